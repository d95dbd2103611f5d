//! Item commands. An item is a note that can be scheduled onto the
//! calendar or the task list; scheduling sets its sync target.

use std::error::Error;

use chrono::Utc;
use clap::Subcommand;
use daybook_core::model::{ItemRecord, ItemTarget};

use super::{open_database, parse_timestamp};

#[derive(Subcommand)]
pub enum ItemAction {
    /// Create a local item
    Add {
        title: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List items
    List {
        /// Include soft-deleted items
        #[arg(long)]
        all: bool,
    },
    /// Schedule an item as a calendar event or a task
    Schedule {
        id: String,
        /// "event" or "task"
        #[arg(long = "as")]
        target: String,
        /// Start time for an event target (RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// End time for an event target (RFC 3339)
        #[arg(long)]
        end: Option<String>,
        /// Due time for a task target (RFC 3339)
        #[arg(long)]
        due: Option<String>,
    },
    /// Remove an item's schedule target (deletes its remote counterpart on
    /// next sync)
    Unschedule { id: String },
    /// Soft-delete an item
    Rm { id: String },
}

pub fn run(action: ItemAction) -> Result<(), Box<dyn Error>> {
    let db = open_database()?;
    match action {
        ItemAction::Add { title, notes } => {
            let mut item = ItemRecord::new(title);
            item.notes = notes;
            db.insert_item(&item)?;
            println!("Created item {}", item.id);
        }
        ItemAction::List { all } => {
            let items = db.list_items(all)?;
            if items.is_empty() {
                println!("No items.");
            }
            for item in items {
                let target = item
                    .target
                    .map(|t| format!(" -> {}", t.as_str()))
                    .unwrap_or_default();
                let marker = if item.deleted_at.is_some() {
                    " [deleted]"
                } else if item.is_unsynced {
                    " [unsynced]"
                } else {
                    ""
                };
                println!("{}  {}{}{}", item.id, item.title, target, marker);
            }
        }
        ItemAction::Schedule {
            id,
            target,
            start,
            end,
            due,
        } => {
            let Some(target) = ItemTarget::parse(&target) else {
                return Err(format!("invalid target '{target}' (expected 'event' or 'task')").into());
            };
            let Some(mut item) = db.get_item(&id)? else {
                return Err(format!("no item with id {id}").into());
            };
            for value in [&start, &end, &due].into_iter().flatten() {
                parse_timestamp(value)?;
            }
            item.target = Some(target);
            if start.is_some() {
                item.start_at = start;
            }
            if end.is_some() {
                item.end_at = end;
            }
            if due.is_some() {
                item.due_at = due;
            }
            item.touch();
            db.update_item(&item)?;
            println!("Scheduled item {id} as {}", target.as_str());
        }
        ItemAction::Unschedule { id } => {
            let Some(mut item) = db.get_item(&id)? else {
                return Err(format!("no item with id {id}").into());
            };
            item.target = None;
            item.touch();
            db.update_item(&item)?;
            println!("Unscheduled item {id}");
        }
        ItemAction::Rm { id } => {
            let Some(mut item) = db.get_item(&id)? else {
                return Err(format!("no item with id {id}").into());
            };
            item.deleted_at = Some(Utc::now().to_rfc3339());
            item.touch();
            db.update_item(&item)?;
            println!("Deleted item {id}");
        }
    }
    Ok(())
}
