//! Durable work queue.
//!
//! Postgres-backed, at-least-once, batched delivery with persisted
//! retry state: a failed delivery is rescheduled with exponential
//! backoff as a `next_run_at` in the row itself, so retries survive
//! process restarts and are visible for audit. Messages that exhaust
//! the retry ceiling land in the dead-letter status automatically.
//!
//! The queue owns in-flight delivery state only; `work_items.status`
//! in the state store stays authoritative on conflict.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use super::store::WorkItemKey;

/// Application-level message payload shared by the seeder and consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePayload {
    pub jurisdiction: String,
    pub locality_code: String,
    pub profession: String,
    pub source_type: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: i32,
}

impl QueuePayload {
    pub fn for_key(key: &WorkItemKey) -> Self {
        Self {
            jurisdiction: key.jurisdiction.clone(),
            locality_code: key.locality_code.clone(),
            profession: key.profession.clone(),
            source_type: key.source_type.clone(),
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }

    pub fn key(&self) -> WorkItemKey {
        WorkItemKey {
            jurisdiction: self.jurisdiction.clone(),
            locality_code: self.locality_code.clone(),
            profession: self.profession.clone(),
            source_type: self.source_type.clone(),
        }
    }
}

/// A claimed message ready for processing.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub payload: QueuePayload,
    /// 1-based delivery attempt number, counted by the queue.
    pub attempt: i32,
}

/// What `nack` did with the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Re-queued for redelivery at the given time.
    Requeued { next_run_at: DateTime<Utc> },
    /// Retry ceiling exceeded; moved to the dead-letter channel.
    DeadLettered,
}

/// Durable at-least-once message channel.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish a message for delivery.
    async fn publish(&self, payload: &QueuePayload) -> Result<Uuid>;

    /// Claim up to `limit` messages for this worker. Claimed messages
    /// carry a lease; expired leases are reclaimed by later calls.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<Delivery>>;

    /// Acknowledge successful processing. Must be called only after
    /// results are persisted (persist-before-ack).
    async fn ack(&self, delivery_id: Uuid) -> Result<()>;

    /// Report a failed delivery. Requeues with backoff while attempts
    /// remain, otherwise dead-letters.
    async fn nack(&self, delivery_id: Uuid, error: &str) -> Result<NackOutcome>;

    /// Messages awaiting or undergoing delivery.
    async fn depth(&self) -> Result<i64>;

    async fn dead_letter_count(&self) -> Result<i64>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

#[derive(FromRow)]
struct ClaimedRow {
    id: Uuid,
    payload: serde_json::Value,
    attempt: i32,
}

pub struct PgWorkQueue {
    pool: PgPool,
    max_retries: i32,
    lease_ms: i64,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, max_retries: i32) -> Self {
        Self {
            pool,
            max_retries,
            lease_ms: 60_000,
        }
    }

    pub fn with_lease_duration(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Exponential backoff in seconds for the next redelivery.
    fn backoff_secs(attempt: i32) -> i64 {
        2i64.pow(attempt.clamp(0, 30) as u32).min(3600)
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn publish(&self, payload: &QueuePayload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let body = serde_json::to_value(payload).context("failed to serialize queue payload")?;

        sqlx::query(
            r#"
            INSERT INTO queue_jobs
                (id, payload, status, attempt, max_retries, next_run_at,
                 created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, $3, NOW(), NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(body)
        .bind(self.max_retries)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<Delivery>> {
        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH next_messages AS (
                SELECT id
                FROM queue_jobs
                WHERE (status = 'pending' AND next_run_at <= NOW())
                   OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY next_run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs
            SET status = 'running',
                attempt = attempt + 1,
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_messages)
            RETURNING id, payload, attempt
            "#,
        )
        .bind(limit)
        .bind(self.lease_ms.to_string())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: QueuePayload = serde_json::from_value(row.payload)
                .with_context(|| format!("invalid payload for queue message {}", row.id))?;
            deliveries.push(Delivery {
                id: row.id,
                payload,
                attempt: row.attempt,
            });
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid, error: &str) -> Result<NackOutcome> {
        let (attempt, max_retries): (i32, i32) =
            sqlx::query_as("SELECT attempt, max_retries FROM queue_jobs WHERE id = $1")
                .bind(delivery_id)
                .fetch_one(&self.pool)
                .await?;

        // attempt is already the count of deliveries made; allowing
        // max_retries redeliveries means max_retries + 1 total attempts.
        if attempt <= max_retries {
            let next_run_at = Utc::now() + chrono::Duration::seconds(Self::backoff_secs(attempt));
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET status = 'pending',
                    next_run_at = $2,
                    error_message = $3,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(delivery_id)
            .bind(next_run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;

            Ok(NackOutcome::Requeued { next_run_at })
        } else {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET status = 'dead_letter',
                    error_message = $2,
                    dead_lettered_at = NOW(),
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(delivery_id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            info!(message_id = %delivery_id, attempts = attempt, "message dead-lettered");
            Ok(NackOutcome::DeadLettered)
        }
    }

    async fn depth(&self) -> Result<i64> {
        let depth = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_jobs WHERE status IN ('pending', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }

    async fn dead_letter_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_jobs WHERE status = 'dead_letter'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(PgWorkQueue::backoff_secs(0), 1);
        assert_eq!(PgWorkQueue::backoff_secs(1), 2);
        assert_eq!(PgWorkQueue::backoff_secs(4), 16);
        assert_eq!(PgWorkQueue::backoff_secs(30), 3600);
    }

    #[test]
    fn payload_round_trips_key() {
        let key = WorkItemKey {
            jurisdiction: "mn".to_string(),
            locality_code: "duluth".to_string(),
            profession: "plumber".to_string(),
            source_type: "state_board".to_string(),
        };
        let payload = QueuePayload::for_key(&key);
        assert_eq!(payload.key(), key);
        assert_eq!(payload.attempt, 0);
    }
}
