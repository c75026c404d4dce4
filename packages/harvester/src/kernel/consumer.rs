//! Consumer/orchestrator: pulls batches from the queue and drives each
//! message through rate acquire → extract → persist → ack.
//!
//! Ordering is load-bearing in `process`: scraped records are persisted
//! and the work item marked before the message is acknowledged, so a
//! crash between persist and ack costs at most a redundant redelivery
//! (made harmless by idempotent upserts), never lost data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use registry_extraction::{ExtractRequest, Extractor, Outcome};

use super::queue::{Delivery, NackOutcome, WorkQueue};
use super::store::{AttemptStatus, MessageLogEntry, StateStore, WorkItemStatus};

/// Configuration for one consumer instance.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum messages claimed per batch.
    pub batch_size: i64,
    /// Sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Deadline for one extractor call.
    pub extract_timeout: Duration,
    /// Bounded number of `try_acquire` attempts before the message is
    /// treated as a transient failure.
    pub max_acquire_attempts: u32,
    /// Attempt ceiling; must match the queue's `max_retries`.
    pub max_retries: i32,
    /// Cap passed to the extractor per call.
    pub result_limit: Option<usize>,
    pub worker_id: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            extract_timeout: Duration::from_secs(60),
            max_acquire_attempts: 10,
            max_retries: 3,
            result_limit: None,
            worker_id: format!("consumer-{}", Uuid::new_v4()),
        }
    }
}

impl ConsumerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct Consumer {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    extractor: Arc<dyn Extractor>,
    config: ConsumerConfig,
    shutdown: Arc<AtomicBool>,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        extractor: Arc<dyn Extractor>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            extractor,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Poll-and-process until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "consumer starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            match self.run_once().await {
                Ok(0) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "failed to claim batch");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "consumer stopped");
        Ok(())
    }

    /// Claim and process one batch. Returns the number of messages
    /// claimed (0 = queue empty). Exposed for tests and for the
    /// coordinator's drain helper.
    pub async fn run_once(&self) -> Result<usize> {
        let deliveries = self
            .queue
            .claim(&self.config.worker_id, self.config.batch_size)
            .await?;
        let claimed = deliveries.len();

        if claimed > 0 {
            debug!(count = claimed, "claimed messages");
        }

        for delivery in deliveries {
            if self.is_shutdown_requested() {
                break;
            }
            self.process(delivery).await;
        }

        self.store
            .record_heartbeat(&self.config.worker_id, Utc::now())
            .await?;

        Ok(claimed)
    }

    /// Process a single delivery end to end. Never returns an error:
    /// every failure path updates the store and the queue instead.
    async fn process(&self, delivery: Delivery) {
        let key = delivery.payload.key();
        let started_at = Utc::now();

        // Idempotency against duplicate delivery: a terminal item is
        // never reprocessed.
        match self.store.get_work_item(&key).await {
            Ok(Some(item)) if item.status.is_terminal() => {
                debug!(key = %key, status = item.status.as_str(), "duplicate delivery, skipping");
                self.ack_and_log(&delivery, &key, started_at, AttemptStatus::Skipped, None)
                    .await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(key = %key, error = %e, "status check failed");
                self.handle_transient(&delivery, &key, started_at, &e.to_string())
                    .await;
                return;
            }
        }

        if let Err(e) = self
            .store
            .upsert_work_item(&key, WorkItemStatus::Processing)
            .await
        {
            error!(key = %key, error = %e, "failed to mark processing");
        }

        // Rate acquire with bounded sleep-based backoff, never a busy
        // loop. Exhaustion is a transient failure.
        if !self.acquire_slot(&key.source_type).await {
            self.handle_transient(&delivery, &key, started_at, "rate limit acquire exhausted")
                .await;
            return;
        }

        let request = ExtractRequest {
            source_type: key.source_type.clone(),
            jurisdiction: key.jurisdiction.clone(),
            locality_code: key.locality_code.clone(),
            profession: key.profession.clone(),
            result_limit: self.config.result_limit,
        };

        let outcome = tokio::time::timeout(
            self.config.extract_timeout,
            self.extractor.extract(&request),
        )
        .await;

        match outcome {
            Ok(Ok(extraction)) => {
                // Zero records is a valid, cacheable completion: the
                // item is completed, and nothing synthetic is written.
                let record_count = extraction.records.len();
                for record in &extraction.records {
                    if let Err(e) = self.store.upsert_scraped_record(record).await {
                        error!(key = %key, error = %e, "failed to persist record");
                        self.handle_transient(&delivery, &key, started_at, &e.to_string())
                            .await;
                        return;
                    }
                }

                if let Err(e) = self
                    .store
                    .upsert_work_item(&key, WorkItemStatus::Completed)
                    .await
                {
                    error!(key = %key, error = %e, "failed to mark completed");
                }

                match extraction.outcome {
                    Outcome::Success { ref strategy_used } => {
                        info!(key = %key, records = record_count, strategy = %strategy_used, "extraction succeeded");
                    }
                    Outcome::Empty => {
                        info!(key = %key, "extraction found no matches (valid empty result)");
                    }
                }

                self.ack_and_log(&delivery, &key, started_at, AttemptStatus::Succeeded, None)
                    .await;
            }
            Ok(Err(e)) if !e.is_transient() => {
                // Permanent: no retries, acknowledged immediately.
                warn!(key = %key, error = %e, "source unsupported");
                if let Err(mark_err) = self
                    .store
                    .upsert_work_item(&key, WorkItemStatus::Unsupported)
                    .await
                {
                    error!(key = %key, error = %mark_err, "failed to mark unsupported");
                }
                self.ack_and_log(
                    &delivery,
                    &key,
                    started_at,
                    AttemptStatus::Failed,
                    Some(e.to_string()),
                )
                .await;
            }
            Ok(Err(e)) => {
                self.handle_transient(&delivery, &key, started_at, &e.to_string())
                    .await;
            }
            Err(_elapsed) => {
                let message = format!(
                    "extractor timed out after {}s",
                    self.config.extract_timeout.as_secs()
                );
                self.handle_transient(&delivery, &key, started_at, &message)
                    .await;
            }
        }
    }

    /// Bounded acquire loop. Sleeps the minimum inter-request interval
    /// implied by the configured ceiling between attempts.
    async fn acquire_slot(&self, source_type: &str) -> bool {
        let interval = match self.store.get_rate_limit(source_type).await {
            Ok(Some(state)) if state.requests_per_second > 0 => {
                acquire_interval(state.requests_per_second)
            }
            _ => Duration::from_millis(1000),
        };

        for attempt in 0..self.config.max_acquire_attempts {
            match self.store.try_acquire(source_type).await {
                Ok(true) => return true,
                Ok(false) => {
                    debug!(source_type, attempt, "rate limited, backing off");
                    tokio::time::sleep(interval).await;
                }
                Err(e) => {
                    error!(source_type, error = %e, "try_acquire failed");
                    tokio::time::sleep(interval).await;
                }
            }
        }
        false
    }

    /// Transient failure: count the attempt, requeue or dead-letter via
    /// the queue's own retry ceiling, and keep the store in step.
    async fn handle_transient(
        &self,
        delivery: &Delivery,
        key: &super::store::WorkItemKey,
        started_at: chrono::DateTime<Utc>,
        error_message: &str,
    ) {
        warn!(key = %key, attempt = delivery.attempt, error = %error_message, "transient failure");

        if let Err(e) = self.store.record_failure(key, error_message).await {
            error!(key = %key, error = %e, "failed to record failure");
        }

        match self.queue.nack(delivery.id, error_message).await {
            Ok(NackOutcome::Requeued { next_run_at }) => {
                // The item stays `processing` through the backoff
                // window; a fresh `queued` transition would reset its
                // attempt count.
                debug!(key = %key, next_run_at = %next_run_at, "requeued for redelivery");
            }
            Ok(NackOutcome::DeadLettered) => {
                warn!(key = %key, attempts = delivery.attempt, "retries exhausted, marking failed");
                if let Err(e) = self
                    .store
                    .upsert_work_item(key, WorkItemStatus::Failed)
                    .await
                {
                    error!(key = %key, error = %e, "failed to mark failed");
                }
            }
            Err(e) => {
                error!(key = %key, error = %e, "nack failed; message will be redelivered on lease expiry");
            }
        }

        self.log_attempt(
            delivery,
            key,
            started_at,
            AttemptStatus::Failed,
            Some(error_message.to_string()),
        )
        .await;
    }

    async fn ack_and_log(
        &self,
        delivery: &Delivery,
        key: &super::store::WorkItemKey,
        started_at: chrono::DateTime<Utc>,
        status: AttemptStatus,
        error_message: Option<String>,
    ) {
        if let Err(e) = self.queue.ack(delivery.id).await {
            error!(key = %key, error = %e, "ack failed; message will be redelivered");
        }
        self.log_attempt(delivery, key, started_at, status, error_message)
            .await;
    }

    /// Every attempt is recorded, regardless of outcome.
    async fn log_attempt(
        &self,
        delivery: &Delivery,
        key: &super::store::WorkItemKey,
        started_at: chrono::DateTime<Utc>,
        status: AttemptStatus,
        error_message: Option<String>,
    ) {
        let entry = MessageLogEntry {
            message_id: delivery.id,
            work_item_key: key.to_string(),
            attempt_number: delivery.attempt,
            status,
            started_at,
            finished_at: Utc::now(),
            error_message,
        };
        if let Err(e) = self.store.record_message(&entry).await {
            error!(key = %key, error = %e, "failed to append audit row");
        }
    }

    /// Run until a Ctrl+C signal is received.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });

        self.run().await
    }
}

/// Inter-request sleep for a given ceiling, floored at 1ms so very
/// high ceilings never degrade into a busy loop.
fn acquire_interval(requests_per_second: i32) -> Duration {
    Duration::from_millis((1000 / requests_per_second.max(1) as u64).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_interval_floors_at_one_millisecond() {
        assert_eq!(acquire_interval(4), Duration::from_millis(250));
        assert_eq!(acquire_interval(1000), Duration::from_millis(1));
        assert_eq!(acquire_interval(2000), Duration::from_millis(1));
        assert_eq!(acquire_interval(i32::MAX), Duration::from_millis(1));
    }

    #[test]
    fn config_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert!(config.worker_id.starts_with("consumer-"));
    }

    #[test]
    fn config_with_worker_id() {
        let config = ConsumerConfig::with_worker_id("my-consumer");
        assert_eq!(config.worker_id, "my-consumer");
    }
}
