pub mod auth;
pub mod event;
pub mod item;
pub mod status;
pub mod sync;
pub mod task;

use std::error::Error;
use std::sync::Arc;

use daybook_core::google::{GoogleClient, KeyringTokenSource};
use daybook_core::storage::{Config, Database};
use daybook_core::sync::{LogNotificationSink, SyncOrchestrator};

pub fn open_database() -> Result<Database, Box<dyn Error>> {
    Ok(Database::open()?)
}

/// Google client backed by the keyring-stored credential.
pub fn google_client() -> GoogleClient {
    GoogleClient::new(Arc::new(KeyringTokenSource::new()))
}

/// Wire up the full sync engine from the stored configuration.
pub fn build_orchestrator() -> Result<SyncOrchestrator, Box<dyn Error>> {
    let db = open_database()?;
    let config = Config::load()?;
    let client = google_client();
    Ok(SyncOrchestrator::new(
        db,
        client,
        Arc::new(LogNotificationSink),
        config.sync,
    ))
}

/// Validate an RFC 3339 timestamp argument.
pub fn parse_timestamp(value: &str) -> Result<String, Box<dyn Error>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| value.to_string())
        .map_err(|e| format!("invalid timestamp '{value}': {e}").into())
}
