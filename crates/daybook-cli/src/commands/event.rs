//! Local calendar event commands. Edits mark the record dirty so the next
//! sync cycle pushes them.

use std::error::Error;

use chrono::Utc;
use clap::Subcommand;
use daybook_core::model::EventRecord;

use super::{google_client, open_database, parse_timestamp};

#[derive(Subcommand)]
pub enum EventAction {
    /// Create a local event
    Add {
        title: String,
        /// Start time (RFC 3339), or YYYY-MM-DD with --all-day
        #[arg(long)]
        start: Option<String>,
        /// End time (RFC 3339), or YYYY-MM-DD with --all-day
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        all_day: bool,
        #[arg(long)]
        description: Option<String>,
        /// Recurrence rule (e.g. "RRULE:FREQ=WEEKLY")
        #[arg(long)]
        rrule: Option<String>,
    },
    /// List events
    List {
        /// Include soft-deleted events
        #[arg(long)]
        all: bool,
    },
    /// Soft-delete an event
    Rm { id: String },
    /// List remote calendars (for the calendar_ids config entry)
    Calendars,
}

pub async fn run(action: EventAction) -> Result<(), Box<dyn Error>> {
    let db = open_database()?;
    match action {
        EventAction::Add {
            title,
            start,
            end,
            all_day,
            description,
            rrule,
        } => {
            let mut ev = EventRecord::new(title);
            ev.all_day = all_day;
            if !all_day {
                if let Some(ref s) = start {
                    parse_timestamp(s)?;
                }
                if let Some(ref e) = end {
                    parse_timestamp(e)?;
                }
            }
            ev.start_at = start;
            ev.end_at = end;
            ev.description = description;
            ev.rrule = rrule;
            db.insert_event(&ev)?;
            println!("Created event {}", ev.id);
        }
        EventAction::List { all } => {
            let events = db.list_events(all)?;
            if events.is_empty() {
                println!("No events.");
            }
            for ev in events {
                let marker = if ev.deleted_at.is_some() {
                    " [deleted]"
                } else if ev.is_unsynced {
                    " [unsynced]"
                } else {
                    ""
                };
                let when = ev.start_at.as_deref().unwrap_or("-");
                println!("{}  {}  {}{}", ev.id, when, ev.title, marker);
            }
        }
        EventAction::Rm { id } => {
            let Some(mut ev) = db.get_event(&id)? else {
                return Err(format!("no event with id {id}").into());
            };
            ev.deleted_at = Some(Utc::now().to_rfc3339());
            ev.touch();
            db.update_event(&ev)?;
            println!("Deleted event {id} (will be removed remotely on next sync)");
        }
        EventAction::Calendars => {
            for cal in google_client().list_calendars().await? {
                let marker = if cal.primary { " [primary]" } else { "" };
                println!("{}  {}{}", cal.id, cal.summary, marker);
            }
        }
    }
    Ok(())
}
