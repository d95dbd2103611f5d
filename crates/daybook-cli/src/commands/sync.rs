//! Sync commands: one-shot cycles, the watch loop, the kill switch, and
//! manual retry of paused records.

use std::error::Error;

use clap::Subcommand;
use daybook_core::sync::CycleReport;

use super::{build_orchestrator, open_database};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one sync cycle
    Once {
        /// Full resync: ignore cursors and refetch the long lookback window
        #[arg(long)]
        full: bool,
    },
    /// Run the periodic sync loop until interrupted
    Watch,
    /// Set the kill switch: every cycle short-circuits until resumed
    Pause,
    /// Clear the kill switch
    Resume,
    /// Clear retry state for a paused record and mark it for push
    Retry { id: String },
}

fn print_report(report: &CycleReport) {
    if let Some(ref reason) = report.skipped {
        println!("Cycle skipped: {reason}");
        return;
    }
    for phase in &report.phases {
        match &phase.error {
            Some(error) => println!("{}: failed ({error})", phase.phase.as_str()),
            None => {
                let s = phase.stats;
                println!(
                    "{}: pushed {} pulled {} deleted {} failed {} paused {} skipped {}",
                    phase.phase.as_str(),
                    s.pushed,
                    s.pulled,
                    s.deleted,
                    s.failed,
                    s.paused,
                    s.skipped,
                );
            }
        }
    }
    if let Some(ref reason) = report.aborted {
        println!("Cycle aborted: {reason}");
    }
}

pub async fn run(action: SyncAction) -> Result<(), Box<dyn Error>> {
    match action {
        SyncAction::Once { full } => {
            let mut orch = build_orchestrator()?;
            let report = orch.run_cycle(full).await?;
            print_report(&report);
        }
        SyncAction::Watch => {
            let mut orch = build_orchestrator()?;
            println!("Watching for changes (ctrl-c to stop)...");
            tokio::select! {
                _ = orch.run_loop() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            println!("Stopped.");
        }
        SyncAction::Pause => {
            let db = open_database()?;
            db.set_kill_switch(true)?;
            println!("Sync paused (kill switch set).");
        }
        SyncAction::Resume => {
            let db = open_database()?;
            db.set_kill_switch(false)?;
            println!("Sync resumed.");
        }
        SyncAction::Retry { id } => {
            let db = open_database()?;
            db.clear_link_retry_state(&id)?;
            let mut found = false;
            if let Some(mut ev) = db.get_event(&id)? {
                ev.touch();
                db.update_event(&ev)?;
                found = true;
            } else if let Some(mut task) = db.get_task(&id)? {
                task.touch();
                db.update_task(&task)?;
                found = true;
            } else if let Some(mut item) = db.get_item(&id)? {
                item.touch();
                db.update_item(&item)?;
                found = true;
            }
            if !found {
                return Err(format!("no record with id {id}").into());
            }
            println!("Record {id} queued for the next sync cycle.");
        }
    }
    Ok(())
}
