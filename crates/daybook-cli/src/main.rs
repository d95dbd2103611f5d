use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "daybook-cli", version, about = "Daybook CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Google authentication management
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Calendar event management
    Event {
        #[command(subcommand)]
        action: commands::event::EventAction,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Item (schedulable note) management
    Item {
        #[command(subcommand)]
        action: commands::item::ItemAction,
    },
    /// Synchronization with Google
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Show local store and sync status
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Auth { action } => commands::auth::run(action).await,
        Commands::Event { action } => commands::event::run(action).await,
        Commands::Task { action } => commands::task::run(action).await,
        Commands::Item { action } => commands::item::run(action),
        Commands::Sync { action } => commands::sync::run(action).await,
        Commands::Status => commands::status::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
