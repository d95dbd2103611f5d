//! Local task commands.

use std::error::Error;

use chrono::Utc;
use clap::Subcommand;
use daybook_core::model::TaskRecord;

use super::{google_client, open_database, parse_timestamp};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a local task
    Add {
        title: String,
        /// Due time (RFC 3339)
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List tasks
    List {
        /// Include soft-deleted tasks
        #[arg(long)]
        all: bool,
    },
    /// Mark a task completed
    Done { id: String },
    /// Soft-delete a task
    Rm { id: String },
    /// List remote task lists (for the task_list_ids config entry)
    Lists,
    /// Create a remote task list
    NewList { title: String },
}

pub async fn run(action: TaskAction) -> Result<(), Box<dyn Error>> {
    let db = open_database()?;
    match action {
        TaskAction::Add { title, due, notes } => {
            let mut task = TaskRecord::new(title);
            if let Some(ref due) = due {
                parse_timestamp(due)?;
            }
            task.due_at = due;
            task.notes = notes;
            db.insert_task(&task)?;
            println!("Created task {}", task.id);
        }
        TaskAction::List { all } => {
            let tasks = db.list_tasks(all)?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                let marker = if task.deleted_at.is_some() {
                    " [deleted]"
                } else if task.completed_at.is_some() {
                    " [done]"
                } else if task.is_unsynced {
                    " [unsynced]"
                } else {
                    ""
                };
                let due = task.due_at.as_deref().unwrap_or("-");
                println!("{}  due {}  {}{}", task.id, due, task.title, marker);
            }
        }
        TaskAction::Done { id } => {
            let Some(mut task) = db.get_task(&id)? else {
                return Err(format!("no task with id {id}").into());
            };
            task.completed_at = Some(Utc::now().to_rfc3339());
            task.touch();
            db.update_task(&task)?;
            println!("Completed task {id}");
        }
        TaskAction::Rm { id } => {
            let Some(mut task) = db.get_task(&id)? else {
                return Err(format!("no task with id {id}").into());
            };
            task.deleted_at = Some(Utc::now().to_rfc3339());
            task.touch();
            db.update_task(&task)?;
            println!("Deleted task {id} (will be removed remotely on next sync)");
        }
        TaskAction::Lists => {
            for list in google_client().list_task_lists().await? {
                println!("{}  {}", list.id, list.title);
            }
        }
        TaskAction::NewList { title } => {
            let list = google_client().create_task_list(&title).await?;
            println!("Created task list {} ({})", list.title, list.id);
        }
    }
    Ok(())
}
