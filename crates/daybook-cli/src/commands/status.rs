//! Combined local store and sync status.

use std::error::Error;

use daybook_core::google::auth;

use super::open_database;

pub fn run() -> Result<(), Box<dyn Error>> {
    let db = open_database()?;

    if auth::is_authenticated() {
        println!("Google: authenticated");
    } else {
        println!("Google: not authenticated");
    }

    if db.kill_switch()? {
        println!("Sync: PAUSED (kill switch set — run 'daybook-cli sync resume')");
    } else {
        println!("Sync: enabled");
    }

    let (events, tasks, items) = db.dirty_counts()?;
    println!("Pending changes: {events} events, {tasks} tasks, {items} items");
    println!("Links: {}", db.count_links()?);

    let failed = db.list_failed_links()?;
    if !failed.is_empty() {
        println!("Permanently failed links ({}):", failed.len());
        for link in failed {
            println!(
                "  {} ({}/{}) after {} retries — retry with 'daybook-cli sync retry {}'",
                link.local_id,
                link.local_type.as_str(),
                link.resource.as_str(),
                link.retry_count,
                link.local_id,
            );
        }
    }

    let cursors = db.list_cursors()?;
    if !cursors.is_empty() {
        println!("Cursors:");
        for cursor in cursors {
            let position = match (&cursor.sync_token, &cursor.last_pulled_at) {
                (Some(_), _) => "incremental token".to_string(),
                (None, Some(at)) => format!("watermark {at}"),
                (None, None) => "cleared (full refetch pending)".to_string(),
            };
            println!(
                "  {}/{}: {}",
                cursor.resource.as_str(),
                cursor.scope_id,
                position
            );
        }
    }

    Ok(())
}
