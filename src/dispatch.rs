use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::model::{BatchRunResult, DispatchStatus};
use crate::publisher::{self, PinPublisher};
use crate::rows::Validated;

/// Publish every valid item in order, pausing `delay` between two items.
///
/// Individual failures never stop the loop; they end up in `results`.
#[instrument(skip_all, fields(items = batch.items.len(), delay_ms = delay.as_millis() as u64))]
pub async fn run(
    batch: Validated,
    publisher: &dyn PinPublisher,
    delay: Duration,
) -> BatchRunResult {
    let started_at = Utc::now();
    let Validated {
        rows_total,
        items,
        errors,
    } = batch;

    let mut results = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        results.push(publisher::publish(publisher, i + 1, item).await);
    }

    let rows_sent = results.iter().filter(|r| r.ok).count();
    let status = if items.is_empty() {
        DispatchStatus::Empty
    } else {
        DispatchStatus::Done
    };
    info!(
        attempted = results.len(),
        sent = rows_sent,
        rejected = errors.len(),
        "dispatch finished"
    );

    BatchRunResult {
        status,
        rows_total,
        rows_valid: items.len(),
        rows_attempted: results.len(),
        rows_sent,
        results,
        errors,
        started_at,
        finished_at: Utc::now(),
    }
}
