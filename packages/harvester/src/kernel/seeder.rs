//! Seeder: enumerates candidate work and publishes it to the queue.
//!
//! Idempotence is enforced here, by checking the state store before
//! publishing — not by deduplication inside the queue. Running `seed`
//! twice in quick succession with no completions in between queues
//! nothing the second time.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::queue::{QueuePayload, WorkQueue};
use super::store::{StateStore, WorkItemKey, WorkItemStatus};

/// Which locality set to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Small fixed set for smoke runs.
    Test,
    /// The full configured production set.
    Full,
}

/// Fixed locality set used by `SeedMode::Test`.
pub const TEST_LOCALITIES: &[&str] = &[
    "minneapolis",
    "st_paul",
    "duluth",
    "rochester",
    "bloomington",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub queued: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Seeder configuration: the enumeration space plus refresh policy.
#[derive(Debug, Clone)]
pub struct SeederConfig {
    pub jurisdiction: String,
    /// Production locality set (`SeedMode::Full`).
    pub localities: Vec<String>,
    pub professions: Vec<String>,
    /// Completed items become seedable again after this many seconds.
    pub refresh_after_secs: i64,
    /// Failed items at or above this attempt count stay failed until
    /// manually replayed.
    pub max_retries: i32,
    /// Ceiling written to newly created rate-limit rows.
    pub requests_per_second: i32,
}

pub struct Seeder {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    config: SeederConfig,
}

impl Seeder {
    pub fn new(store: Arc<dyn StateStore>, queue: Arc<dyn WorkQueue>, config: SeederConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Enumerate `(source, locality, profession)` and queue what is
    /// unseen or due for refresh.
    pub async fn seed(&self, mode: SeedMode, sources: &[String]) -> Result<SeedSummary> {
        let localities: Vec<String> = match mode {
            SeedMode::Test => TEST_LOCALITIES.iter().map(|l| l.to_string()).collect(),
            SeedMode::Full => self.config.localities.clone(),
        };

        let mut summary = SeedSummary::default();

        for source in sources {
            // Rate-limit row must exist before any consumer acquires.
            self.store
                .ensure_rate_limit(source, self.config.requests_per_second)
                .await?;

            for locality in &localities {
                for profession in &self.config.professions {
                    let key = WorkItemKey {
                        jurisdiction: self.config.jurisdiction.clone(),
                        locality_code: locality.clone(),
                        profession: profession.clone(),
                        source_type: source.clone(),
                    };

                    if !self.is_seedable(&key).await? {
                        summary.skipped += 1;
                        continue;
                    }

                    // Mark queued before publishing. A consumer can
                    // claim the message the instant it lands, and its
                    // completion must not be overwritten afterwards.
                    self.store
                        .upsert_work_item(&key, WorkItemStatus::Queued)
                        .await?;
                    match self.queue.publish(&QueuePayload::for_key(&key)).await {
                        Ok(_) => {
                            summary.queued += 1;
                        }
                        Err(e) => {
                            // Revert; the next seed cycle retries.
                            warn!(key = %key, error = %e, "publish failed, leaving item unqueued");
                            self.store
                                .upsert_work_item(&key, WorkItemStatus::Unqueued)
                                .await?;
                            summary.errors += 1;
                        }
                    }
                }
            }
        }

        info!(
            mode = ?mode,
            sources = sources.len(),
            queued = summary.queued,
            skipped = summary.skipped,
            errors = summary.errors,
            "seed complete"
        );
        Ok(summary)
    }

    /// Whether this identity should be (re-)queued now.
    async fn is_seedable(&self, key: &WorkItemKey) -> Result<bool> {
        let Some(existing) = self.store.get_work_item(key).await? else {
            return Ok(true);
        };

        Ok(match existing.status {
            WorkItemStatus::Unqueued => true,
            // At most one non-terminal row per identity.
            WorkItemStatus::Queued | WorkItemStatus::Processing => false,
            WorkItemStatus::Completed => match existing.completed_at {
                Some(done) => {
                    Utc::now() - done >= chrono::Duration::seconds(self.config.refresh_after_secs)
                }
                None => true,
            },
            WorkItemStatus::Failed => existing.attempt_count < self.config.max_retries,
            WorkItemStatus::Unsupported => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::queue::{Delivery, NackOutcome};
    use crate::kernel::testing::{InMemoryQueue, MemoryStateStore};
    use anyhow::bail;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Queue double that verifies the work item is already `queued` in
    /// the store at the moment of publish.
    struct StatusCheckingQueue {
        store: Arc<MemoryStateStore>,
        inner: InMemoryQueue,
    }

    #[async_trait]
    impl WorkQueue for StatusCheckingQueue {
        async fn publish(&self, payload: &QueuePayload) -> anyhow::Result<Uuid> {
            let item = self.store.get_work_item(&payload.key()).await?;
            match item {
                Some(item) if item.status == WorkItemStatus::Queued => {
                    self.inner.publish(payload).await
                }
                other => bail!("published before marking queued: {other:?}"),
            }
        }

        async fn claim(&self, worker_id: &str, limit: i64) -> anyhow::Result<Vec<Delivery>> {
            self.inner.claim(worker_id, limit).await
        }

        async fn ack(&self, delivery_id: Uuid) -> anyhow::Result<()> {
            self.inner.ack(delivery_id).await
        }

        async fn nack(&self, delivery_id: Uuid, error: &str) -> anyhow::Result<NackOutcome> {
            self.inner.nack(delivery_id, error).await
        }

        async fn depth(&self) -> anyhow::Result<i64> {
            self.inner.depth().await
        }

        async fn dead_letter_count(&self) -> anyhow::Result<i64> {
            self.inner.dead_letter_count().await
        }
    }

    /// Queue double whose publish always fails.
    struct FailingQueue;

    #[async_trait]
    impl WorkQueue for FailingQueue {
        async fn publish(&self, _payload: &QueuePayload) -> anyhow::Result<Uuid> {
            bail!("broker unavailable")
        }

        async fn claim(&self, _worker_id: &str, _limit: i64) -> anyhow::Result<Vec<Delivery>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _delivery_id: Uuid) -> anyhow::Result<()> {
            bail!("nothing delivered")
        }

        async fn nack(&self, _delivery_id: Uuid, _error: &str) -> anyhow::Result<NackOutcome> {
            bail!("nothing delivered")
        }

        async fn depth(&self) -> anyhow::Result<i64> {
            Ok(0)
        }

        async fn dead_letter_count(&self) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    fn config() -> SeederConfig {
        SeederConfig {
            jurisdiction: "mn".to_string(),
            localities: vec!["minneapolis".to_string(), "duluth".to_string()],
            professions: vec!["electrician".to_string()],
            refresh_after_secs: 3600,
            max_retries: 3,
            requests_per_second: 5,
        }
    }

    fn seeder(
        store: Arc<MemoryStateStore>,
        queue: Arc<InMemoryQueue>,
    ) -> Seeder {
        Seeder::new(store, queue, config())
    }

    #[tokio::test]
    async fn test_mode_seeds_fixed_locality_set() {
        let store = Arc::new(MemoryStateStore::new(5));
        let queue = Arc::new(InMemoryQueue::new(3));
        let seeder = seeder(store.clone(), queue.clone());

        let summary = seeder
            .seed(SeedMode::Test, &["state_board".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.queued, TEST_LOCALITIES.len() as u32);
        assert_eq!(summary.skipped, 0);
        assert_eq!(queue.depth().await.unwrap(), TEST_LOCALITIES.len() as i64);
    }

    #[tokio::test]
    async fn reseeding_skips_queued_items() {
        let store = Arc::new(MemoryStateStore::new(5));
        let queue = Arc::new(InMemoryQueue::new(3));
        let seeder = seeder(store.clone(), queue.clone());
        let sources = vec!["state_board".to_string()];

        let first = seeder.seed(SeedMode::Test, &sources).await.unwrap();
        let second = seeder.seed(SeedMode::Test, &sources).await.unwrap();

        assert_eq!(first.queued, 5);
        assert_eq!(second.queued, 0);
        assert_eq!(second.skipped, 5);
        // No double-publish either.
        assert_eq!(queue.depth().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn full_mode_uses_configured_localities() {
        let store = Arc::new(MemoryStateStore::new(5));
        let queue = Arc::new(InMemoryQueue::new(3));
        let seeder = seeder(store.clone(), queue.clone());

        let summary = seeder
            .seed(SeedMode::Full, &["state_board".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.queued, 2);
    }

    #[tokio::test]
    async fn unsupported_items_are_never_reseeded() {
        let store = Arc::new(MemoryStateStore::new(5));
        let queue = Arc::new(InMemoryQueue::new(3));
        let seeder = seeder(store.clone(), queue.clone());
        let key = WorkItemKey {
            jurisdiction: "mn".to_string(),
            locality_code: "minneapolis".to_string(),
            profession: "electrician".to_string(),
            source_type: "state_board".to_string(),
        };
        store
            .upsert_work_item(&key, WorkItemStatus::Unsupported)
            .await
            .unwrap();

        let summary = seeder
            .seed(SeedMode::Full, &["state_board".to_string()])
            .await
            .unwrap();

        // minneapolis skipped, duluth queued
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn items_are_marked_queued_before_publish() {
        let store = Arc::new(MemoryStateStore::new(5));
        let queue = Arc::new(StatusCheckingQueue {
            store: store.clone(),
            inner: InMemoryQueue::new(3),
        });
        let seeder = Seeder::new(store.clone(), queue.clone(), config());

        let summary = seeder
            .seed(SeedMode::Full, &["state_board".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.queued, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_failure_reverts_item_to_unqueued() {
        let store = Arc::new(MemoryStateStore::new(5));
        let seeder = Seeder::new(store.clone(), Arc::new(FailingQueue), config());

        let summary = seeder
            .seed(SeedMode::Full, &["state_board".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.queued, 0);
        assert_eq!(summary.errors, 2);
        for locality in ["minneapolis", "duluth"] {
            let key = WorkItemKey {
                jurisdiction: "mn".to_string(),
                locality_code: locality.to_string(),
                profession: "electrician".to_string(),
                source_type: "state_board".to_string(),
            };
            let item = store.get_work_item(&key).await.unwrap().unwrap();
            assert_eq!(item.status, WorkItemStatus::Unqueued);
        }
    }
}
