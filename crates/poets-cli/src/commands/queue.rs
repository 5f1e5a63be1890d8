//! Implementation of `poets-orchestrator --queue`.
//!
//! Runs one queue tick and prints a short summary. A busy lock and an
//! empty queue are both normal outcomes and exit 0, so aggressive
//! scheduler intervals stay quiet.

use poets_core::config::Config;
use poets_core::processor::{QueueProcessor, TickOutcome};
use poets_core::storage;

/// Execute a full queue tick.
pub async fn execute(config: &Config) -> anyhow::Result<()> {
    let pool = storage::init_db(&config.database.path).await?;

    let processor = QueueProcessor::new(config.clone(), pool.clone());
    let outcome = processor.run_tick().await;
    pool.close().await;

    match outcome? {
        TickOutcome::Busy => {
            eprintln!("queue tick skipped: another instance is running");
        }
        TickOutcome::Idle => {
            eprintln!("queue tick: nothing to do");
        }
        TickOutcome::Aborted { reason } => {
            eprintln!("queue tick abandoned: {reason}");
        }
        TickOutcome::Completed(report) => {
            eprintln!(
                "queue tick: text {}/{} ok, media {}/{} ok, {} deferred",
                report.text_processed,
                report.text_processed + report.text_failed,
                report.media_processed,
                report.media_processed + report.media_failed,
                report.media_deferred,
            );
        }
    }

    Ok(())
}
