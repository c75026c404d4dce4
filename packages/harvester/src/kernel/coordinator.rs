//! Coordinator: periodic trigger that keeps the queue fed and watches
//! aggregate health.
//!
//! Runs on a fixed cadence. It reads queue depth and work-item counts
//! from the state store, triggers the seeder when depth falls below the
//! low-water mark or a per-source schedule comes due, and surfaces
//! derived alerts (error rate, stalled queue, silent workers) through
//! structured logs. It never touches scraped records and never retries
//! on behalf of the consumer.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use super::queue::WorkQueue;
use super::seeder::{SeedMode, Seeder};
use super::store::{StateStore, WorkItemStatus};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Seed when pending + in-flight depth drops below this.
    pub queue_low_water_mark: i64,
    /// Six-field cron expression for the periodic run.
    pub cadence: String,
    /// Alert when failed / (failed + completed) exceeds this.
    pub error_rate_threshold: f64,
    /// Alert when the queue has depth but nothing has been attempted
    /// for this many seconds.
    pub stale_after_secs: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_low_water_mark: 25,
            cadence: "0 */5 * * * *".to_string(),
            error_rate_threshold: 0.5,
            stale_after_secs: 900,
        }
    }
}

/// Outcome of one coordinator pass, for logs and tests.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorReport {
    pub queue_depth: i64,
    pub low_water_seed: bool,
    pub due_sources: Vec<String>,
    pub alerts: Vec<String>,
}

pub struct Coordinator {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    seeder: Arc<Seeder>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        seeder: Arc<Seeder>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            seeder,
            config,
        }
    }

    /// One coordinator pass.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CoordinatorReport> {
        let mut report = CoordinatorReport {
            queue_depth: self.queue.depth().await?,
            ..Default::default()
        };

        let schedules = self.store.schedules().await?;
        let enabled_sources: Vec<String> = schedules
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.source_type.clone())
            .collect();

        // Low-water refill across all enabled sources.
        if report.queue_depth < self.config.queue_low_water_mark && !enabled_sources.is_empty() {
            let summary = self.seeder.seed(SeedMode::Full, &enabled_sources).await?;
            info!(
                depth = report.queue_depth,
                low_water = self.config.queue_low_water_mark,
                queued = summary.queued,
                "queue below low-water mark, seeded"
            );
            report.low_water_seed = true;
        }

        // Per-source cadence.
        for entry in &schedules {
            if entry.is_due(now) {
                let source = vec![entry.source_type.clone()];
                let summary = self.seeder.seed(SeedMode::Full, &source).await?;
                self.store.mark_schedule_run(&entry.source_type, now).await?;
                info!(
                    source_type = %entry.source_type,
                    queued = summary.queued,
                    skipped = summary.skipped,
                    "schedule due, seeded source"
                );
                report.due_sources.push(entry.source_type.clone());
            }
        }

        report.alerts = self.derive_alerts(now, report.queue_depth).await?;
        for alert in &report.alerts {
            warn!(alert = %alert, "coordinator alert");
        }

        self.store.record_heartbeat("coordinator", now).await?;
        Ok(report)
    }

    async fn derive_alerts(&self, now: DateTime<Utc>, depth: i64) -> Result<Vec<String>> {
        let mut alerts = Vec::new();

        let counts = self.store.counts_by_status().await?;
        let failed: i64 = counts
            .iter()
            .filter(|c| c.status == WorkItemStatus::Failed)
            .map(|c| c.count)
            .sum();
        let completed: i64 = counts
            .iter()
            .filter(|c| c.status == WorkItemStatus::Completed)
            .map(|c| c.count)
            .sum();
        let finished = failed + completed;
        if finished > 0 {
            let error_rate = failed as f64 / finished as f64;
            if error_rate > self.config.error_rate_threshold {
                alerts.push(format!(
                    "elevated error rate: {failed}/{finished} finished items failed"
                ));
            }
        }

        if depth > 0 {
            let stale = match self.store.last_attempt_at().await? {
                Some(last) => {
                    now - last >= chrono::Duration::seconds(self.config.stale_after_secs)
                }
                // Depth but no attempt ever: workers are silent.
                None => true,
            };
            if stale {
                alerts.push(format!(
                    "stalled queue: depth {depth} with no attempts in the last {}s",
                    self.config.stale_after_secs
                ));
            }
        }

        // A worker that once beat and then went quiet is flagged even
        // when the queue itself is still moving.
        for beat in self.store.worker_heartbeats().await? {
            if beat.name == "coordinator" {
                continue;
            }
            if now - beat.beat_at >= chrono::Duration::seconds(self.config.stale_after_secs) {
                alerts.push(format!(
                    "silent worker: {} last heartbeat at {}",
                    beat.name, beat.beat_at
                ));
            }
        }

        Ok(alerts)
    }

    /// Install the periodic pass on a cron scheduler.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        let coordinator = self.clone();
        let cadence = self.config.cadence.clone();
        let job = Job::new_async(cadence.as_str(), move |_uuid, _lock| {
            let coordinator = coordinator.clone();
            Box::pin(async move {
                if let Err(e) = coordinator.run_once(Utc::now()).await {
                    tracing::error!(error = %e, "coordinator pass failed");
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!(cadence = %self.config.cadence, "coordinator started");
        Ok(scheduler)
    }
}
