//! Shared harness for the sync integration tests: an in-memory store and a
//! Google client pointed at a mockito server.

use std::sync::Arc;

use daybook_core::google::{GoogleClient, StaticTokenSource};
use daybook_core::storage::{Database, SyncSettings};
use daybook_core::sync::{MemoryNotificationSink, SyncContext};

pub struct Harness {
    pub db: Database,
    pub client: GoogleClient,
    pub notifier: MemoryNotificationSink,
    pub settings: SyncSettings,
}

impl Harness {
    pub fn new(server: &mockito::ServerGuard) -> Self {
        let mut settings = SyncSettings::default();
        // Plain list id: '@default' would be percent-encoded in mock paths.
        settings.task_list_ids = vec!["list-1".to_string()];
        Self {
            db: Database::open_memory().expect("in-memory db"),
            client: GoogleClient::with_base_urls(
                Arc::new(StaticTokenSource::new("test-token")),
                server.url(),
                server.url(),
            ),
            notifier: MemoryNotificationSink::new(),
            settings,
        }
    }

    pub fn cx(&self) -> SyncContext<'_> {
        SyncContext {
            db: &self.db,
            client: &self.client,
            notifier: &self.notifier,
            settings: &self.settings,
            user_id: "tester".to_string(),
        }
    }
}
