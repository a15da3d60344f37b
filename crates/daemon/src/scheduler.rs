//! Policy scheduler: evaluates sync policies on a fixed interval and syncs
//! the sources that are due.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tracing::{error, info, warn};

use kfed_core::models::BatchSyncReport;
use kfed_core::FederatedResolver;

/// Tracks aggregate statistics across cycles.
#[derive(Default)]
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub total_synced: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

/// Runs `sync_due()` every `poll_interval`.
///
/// If a cycle is still running when the next tick fires, that tick is
/// skipped rather than queued.
pub struct Scheduler {
    resolver: Arc<FederatedResolver>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(resolver: Arc<FederatedResolver>, poll_interval: Duration) -> Self {
        Self {
            resolver,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Main loop. The first cycle runs immediately; returns once `shutdown`
    /// is notified, after the current cycle (if any) has finished.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maybe_run_cycle("scheduled").await;
                }
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Attempt one cycle. If one is already running, skip.
    pub async fn maybe_run_cycle(&self, trigger: &str) -> Option<BatchSyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(trigger, "skipping cycle: previous cycle still running");
            return None;
        }

        let cycle = self.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cycle, trigger, "starting policy cycle");

        let report = self.resolver.sync_due().await;
        self.record(cycle, &report);

        self.running.store(false, Ordering::SeqCst);
        Some(report)
    }

    fn record(&self, cycle: u64, report: &BatchSyncReport) {
        self.stats
            .total_synced
            .fetch_add(report.successful as u64, Ordering::SeqCst);

        if report.failed == 0 {
            self.stats.consecutive_errors.store(0, Ordering::SeqCst);
            info!(
                cycle,
                due = report.total,
                synced = report.successful,
                in_progress = report.in_progress,
                "policy cycle completed"
            );
            return;
        }

        let errors = self
            .stats
            .total_errors
            .fetch_add(report.failed as u64, Ordering::SeqCst)
            + report.failed as u64;
        let consecutive = self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        for result in report.results.iter().filter(|r| r.is_error()) {
            if let kfed_core::models::SyncOutcome::Error { detail } = &result.outcome {
                error!(cycle, source = %result.source, error = %detail, "source sync failed");
            }
        }
        error!(
            cycle,
            failed = report.failed,
            synced = report.successful,
            total_errors = errors,
            consecutive_errors = consecutive,
            "policy cycle finished with failures"
        );
    }
}
