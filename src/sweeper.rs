use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::info;

use crate::engine::Engine;
use crate::observability::{SWEEP_COMPLETED_TOTAL, SWEEP_RUNS_TOTAL, WAL_COMPACTIONS_TOTAL};

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Time from `now` until the next `at` on the local clock. Exactly `at` counts as next.
pub fn duration_until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        match now.date().succ_opt() {
            Some(tomorrow) => tomorrow.and_time(at),
            None => return Duration::MAX,
        }
    };
    (next - now).to_std().unwrap_or_default()
}

/// Complete every pending or confirmed reservation dated before `today`.
/// Failures are logged and retried by the next run.
pub async fn sweep_once(engine: &Engine, today: NaiveDate) -> Option<usize> {
    let cutoff = today.pred_opt()?;
    match engine.complete_through(cutoff).await {
        Ok(completed) => {
            metrics::counter!(SWEEP_RUNS_TOTAL, "status" => "ok").increment(1);
            metrics::counter!(SWEEP_COMPLETED_TOTAL).increment(completed as u64);
            info!("sweep completed {completed} reservations dated on or before {cutoff}");
            Some(completed)
        }
        Err(e) => {
            metrics::counter!(SWEEP_RUNS_TOTAL, "status" => "error").increment(1);
            tracing::error!("sweep through {cutoff} failed: {e}");
            None
        }
    }
}

/// Background task: one sweep at startup to catch up after downtime, then one at
/// `sweep_at` local time every day.
pub async fn run_daily_sweep(engine: Arc<Engine>, sweep_at: NaiveTime) {
    sweep_once(&engine, Local::now().date_naive()).await;
    loop {
        let wait = duration_until_next(Local::now().naive_local(), sweep_at);
        tracing::debug!("next sweep in {}s", wait.as_secs());
        tokio::time::sleep(wait).await;
        sweep_once(&engine, Local::now().date_naive()).await;
    }
}

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
                info!("compacted WAL after {appends} appends, {} reservations live", engine.store.len());
            }
            Err(e) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
                tracing::error!("WAL compaction failed: {e}");
            }
        }
    }
}
