//! Google authentication commands.

use std::error::Error;

use clap::Subcommand;
use daybook_core::google::auth;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Connect a Google account (opens the browser)
    Login {
        /// Label for the connected account (e.g. the address)
        #[arg(long)]
        account: Option<String>,
    },
    /// Remove stored Google tokens
    Logout,
    /// Show authentication status
    Status,
    /// Store OAuth client credentials in the OS keyring
    Credentials {
        client_id: String,
        client_secret: String,
    },
}

pub async fn run(action: AuthAction) -> Result<(), Box<dyn Error>> {
    match action {
        AuthAction::Login { account } => {
            println!("Opening browser for Google consent...");
            auth::authorize(account.as_deref()).await?;
            println!("Connected to Google.");
        }
        AuthAction::Logout => {
            auth::logout()?;
            println!("Disconnected from Google.");
        }
        AuthAction::Status => {
            if auth::is_authenticated() {
                println!("Google: authenticated");
            } else {
                println!("Google: not authenticated (run 'daybook-cli auth login')");
            }
        }
        AuthAction::Credentials {
            client_id,
            client_secret,
        } => {
            auth::set_client_credentials(&client_id, &client_secret)?;
            println!("Stored OAuth client credentials.");
        }
    }
    Ok(())
}
