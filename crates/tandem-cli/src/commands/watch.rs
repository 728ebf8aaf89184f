use std::path::Path;

use tandem_core::version::VersionGate;
use tandem_core::SyncStatus;

use crate::commands::common::{describe_status, format_report_lines, open_orchestrator};
use crate::commands::version::CLI_PLATFORM;
use crate::error::CliError;

/// Sync once, then on every realtime change, until Ctrl-C.
pub async fn run_watch(db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(db_path, profile).await?;
    let gate = VersionGate::new(CLI_PLATFORM, env!("CARGO_PKG_VERSION"))?;

    if let Err(error) = orchestrator.start(Some(&gate)).await {
        orchestrator.shutdown().await?;
        return Err(error.into());
    }
    orchestrator.start_listening().await?;
    orchestrator.request_sync();
    println!("Watching for changes. Press Ctrl-C to stop.");

    let mut status = orchestrator.subscribe_status();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                println!("{}", describe_status(&current));
                if matches!(current, SyncStatus::Ok { .. } | SyncStatus::Error { .. }) {
                    if let Some(report) = orchestrator.last_report() {
                        for line in format_report_lines(&report) {
                            println!("{line}");
                        }
                    }
                }
            }
        }
    }

    println!("Stopping...");
    orchestrator.shutdown().await?;
    Ok(())
}
