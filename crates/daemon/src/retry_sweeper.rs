//! Periodic retry of pending failure-ledger records.
//!
//! The sweeper sits outside the coordinator: each pass lists pending records
//! whose last attempt is older than the configured minimum age and calls
//! `retry_sync` on each in turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use converge_sync_core::coordinator::SyncCoordinator;

/// Actor recorded in the audit log for sweeper retries.
pub const SWEEPER_ACTOR: &str = "retry-sweeper";

/// Records retried per pass at most.
const BATCH_SIZE: u32 = 50;

/// Aggregate statistics across passes.
#[derive(Default)]
pub struct SweepStats {
    pub passes: AtomicU64,
    pub resolved: AtomicU64,
    pub still_failing: AtomicU64,
    pub errors: AtomicU64,
}

/// Result of one pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
}

pub struct RetrySweeper {
    coordinator: Arc<SyncCoordinator>,
    interval: Duration,
    min_age: chrono::Duration,
    stats: Arc<SweepStats>,
}

impl RetrySweeper {
    pub fn new(coordinator: Arc<SyncCoordinator>, interval: Duration, min_age: Duration) -> Self {
        Self {
            coordinator,
            interval,
            min_age: chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero()),
            stats: Arc::new(SweepStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SweepStats> {
        self.stats.clone()
    }

    /// Sweep every `interval` until `shutdown` is notified. A pass in
    /// progress is finished before returning.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            interval_secs = self.interval.as_secs(),
            min_age_secs = self.min_age.num_seconds(),
            "retry sweeper started"
        );

        let mut interval = time::interval(self.interval);
        // The first tick fires immediately; give the server time to start.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.notified() => {
                    info!("retry sweeper stopping");
                    return;
                }
            }
        }
    }

    /// Run one pass over the eligible records.
    pub async fn sweep_once(&self) -> SweepReport {
        let pass = self.stats.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let candidates = match self.coordinator.retry_candidates(self.min_age, BATCH_SIZE) {
            Ok(c) => c,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::SeqCst);
                error!(pass, error = %e, "could not list retry candidates");
                return SweepReport::default();
            }
        };
        if candidates.is_empty() {
            debug!(pass, "nothing to retry");
            return SweepReport::default();
        }

        let mut report = SweepReport::default();
        for record in candidates {
            report.attempted += 1;
            match self.coordinator.retry_sync(&record.id, SWEEPER_ACTOR).await {
                Ok(outcome) if outcome.resolved => {
                    report.resolved += 1;
                    self.stats.resolved.fetch_add(1, Ordering::SeqCst);
                }
                Ok(_) => {
                    report.still_failing += 1;
                    self.stats.still_failing.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    // Resolved or cleared since it was listed.
                    self.stats.errors.fetch_add(1, Ordering::SeqCst);
                    warn!(record_id = %record.id, error = %e, "retry skipped");
                }
            }
        }

        info!(
            pass,
            attempted = report.attempted,
            resolved = report.resolved,
            still_failing = report.still_failing,
            "retry sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_sync_core::db::Database;
    use converge_sync_core::models::{FailureFilter, SyncType};
    use converge_sync_core::sheets::{MemorySheets, SheetRow};

    fn project(stage: &str) -> SheetRow {
        SheetRow::from_pairs(
            1,
            &[("Project ID", "P-1"), ("Project Title", "Swarm"), ("Stage", stage)],
        )
    }

    fn setup() -> (Arc<MemorySheets>, Arc<SyncCoordinator>) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let sheets = Arc::new(MemorySheets::new());
        let coordinator = Arc::new(SyncCoordinator::new(db, sheets.clone(), 5));
        (sheets, coordinator)
    }

    #[tokio::test]
    async fn test_sweep_resolves_fixed_rows() {
        let (sheets, coordinator) = setup();
        sheets.set_rows(SyncType::Projects, vec![project("Vaporware")]);
        coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();

        let sweeper = RetrySweeper::new(coordinator.clone(), Duration::from_secs(60), Duration::ZERO);
        let report = sweeper.sweep_once().await;
        assert_eq!((report.attempted, report.still_failing), (1, 1));

        sheets.set_rows(SyncType::Projects, vec![project("Pilot")]);
        let report = sweeper.sweep_once().await;
        assert_eq!(report.resolved, 1);
        assert!(coordinator.list_failed(&FailureFilter::default()).unwrap().is_empty());
        assert_eq!(sweeper.stats().passes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sweep_skips_recent_failures() {
        let (sheets, coordinator) = setup();
        sheets.set_rows(SyncType::Projects, vec![project("Vaporware")]);
        coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();

        let sweeper = RetrySweeper::new(coordinator, Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_, coordinator) = setup();
        let sweeper = RetrySweeper::new(coordinator, Duration::from_secs(3600), Duration::ZERO);
        let shutdown = Arc::new(Notify::new());
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sweeper.run(shutdown).await })
        };
        tokio::task::yield_now().await;
        shutdown.notify_one();
        time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
