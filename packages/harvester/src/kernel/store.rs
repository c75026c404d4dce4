//! Durable state store.
//!
//! Single source of truth for "has this been done, and when can we do
//! it again": per-job status, per-source rate-limit counters, the
//! append-only message audit log, refresh schedules, and the harvested
//! records themselves. Everything else reads and writes through the
//! [`StateStore`] trait; Postgres is the production backend.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use registry_extraction::LicenseRecord;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "work_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Unqueued,
    Queued,
    Processing,
    Completed,
    Failed,
    Unsupported,
}

impl WorkItemStatus {
    /// Terminal states are never reprocessed by a duplicate delivery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemStatus::Completed | WorkItemStatus::Unsupported)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Unqueued => "unqueued",
            WorkItemStatus::Queued => "queued",
            WorkItemStatus::Processing => "processing",
            WorkItemStatus::Completed => "completed",
            WorkItemStatus::Failed => "failed",
            WorkItemStatus::Unsupported => "unsupported",
        }
    }
}

/// Natural identity of one unit of scraping work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemKey {
    pub jurisdiction: String,
    pub locality_code: String,
    pub profession: String,
    pub source_type: String,
}

impl std::fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.jurisdiction, self.locality_code, self.profession, self.source_type
        )
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub jurisdiction: String,
    pub locality_code: String,
    pub profession: String,
    pub source_type: String,
    pub status: WorkItemStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn key(&self) -> WorkItemKey {
        WorkItemKey {
            jurisdiction: self.jurisdiction.clone(),
            locality_code: self.locality_code.clone(),
            profession: self.profession.clone(),
            source_type: self.source_type.clone(),
        }
    }
}

/// Filter for [`StateStore::find_work_items`].
#[derive(Debug, Clone, Default)]
pub struct WorkItemFilter {
    pub source_type: Option<String>,
    pub status: Option<WorkItemStatus>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    pub source_type: String,
    pub requests_per_second: i32,
    pub window_start: DateTime<Utc>,
    pub count_in_window: i32,
    pub is_throttled: bool,
}

/// Outcome of one delivery attempt, recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One append-only audit row per delivery attempt. Never mutated.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub message_id: Uuid,
    pub work_item_key: String,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub source_type: String,
    pub cadence_secs: i64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run_at {
            None => true,
            Some(last) => now - last >= chrono::Duration::seconds(self.cadence_secs),
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub source_type: String,
    pub status: WorkItemStatus,
    pub count: i64,
}

/// Liveness beacon row for one named worker or the coordinator.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub name: String,
    pub beat_at: DateTime<Utc>,
}

// ============================================================================
// Trait
// ============================================================================

/// Durable state operations shared by every component.
///
/// `try_acquire` is the one operation with a real concurrency hazard:
/// it must be an atomic conditional increment so that two consumers
/// cannot both take the last slot in a window.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_work_item(&self, key: &WorkItemKey) -> Result<Option<WorkItem>>;

    /// Create the item if absent, otherwise transition its status.
    /// Sets `queued_at` on `Queued` and `completed_at` on `Completed`.
    async fn upsert_work_item(&self, key: &WorkItemKey, status: WorkItemStatus) -> Result<()>;

    async fn find_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>>;

    /// Record a failed attempt: increments `attempt_count`, stores the
    /// error. Returns the new attempt count.
    async fn record_failure(&self, key: &WorkItemKey, error: &str) -> Result<i32>;

    /// Append one audit row for a concluded delivery attempt.
    async fn record_message(&self, entry: &MessageLogEntry) -> Result<()>;

    /// Ensure a rate-limit row exists for the source.
    async fn ensure_rate_limit(&self, source_type: &str, requests_per_second: i32) -> Result<()>;

    async fn get_rate_limit(&self, source_type: &str) -> Result<Option<RateLimitState>>;

    /// Atomic check-and-increment against the per-second ceiling.
    /// Returns `true` when a request slot was admitted.
    async fn try_acquire(&self, source_type: &str) -> Result<bool>;

    /// Idempotent upsert keyed on `(source_type, source_license_id)`.
    async fn upsert_scraped_record(&self, record: &LicenseRecord) -> Result<()>;

    async fn scraped_record_count(&self) -> Result<i64>;

    async fn counts_by_status(&self) -> Result<Vec<StatusCount>>;

    async fn rate_limit_states(&self) -> Result<Vec<RateLimitState>>;

    async fn schedules(&self) -> Result<Vec<ScheduleEntry>>;

    async fn mark_schedule_run(&self, source_type: &str, at: DateTime<Utc>) -> Result<()>;

    /// Liveness beacon for the coordinator and workers.
    async fn record_heartbeat(&self, name: &str, at: DateTime<Utc>) -> Result<()>;

    /// All recorded heartbeats, for staleness checks.
    async fn worker_heartbeats(&self) -> Result<Vec<Heartbeat>>;

    /// When the most recent delivery attempt concluded, across all
    /// items. `None` means nothing has ever been attempted.
    async fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PgStateStore {
    pool: PgPool,
    default_requests_per_second: i32,
}

impl PgStateStore {
    pub fn new(pool: PgPool, default_requests_per_second: i32) -> Self {
        Self {
            pool,
            default_requests_per_second,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const WORK_ITEM_COLUMNS: &str = "id, jurisdiction, locality_code, profession, source_type, \
     status, attempt_count, last_error, queued_at, completed_at, created_at, updated_at";

#[async_trait]
impl StateStore for PgStateStore {
    async fn get_work_item(&self, key: &WorkItemKey) -> Result<Option<WorkItem>> {
        let item = sqlx::query_as::<_, WorkItem>(&format!(
            r#"
            SELECT {WORK_ITEM_COLUMNS}
            FROM work_items
            WHERE jurisdiction = $1 AND locality_code = $2
              AND profession = $3 AND source_type = $4
            "#
        ))
        .bind(&key.jurisdiction)
        .bind(&key.locality_code)
        .bind(&key.profession)
        .bind(&key.source_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn upsert_work_item(&self, key: &WorkItemKey, status: WorkItemStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_items
                (id, jurisdiction, locality_code, profession, source_type, status,
                 attempt_count, queued_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0,
                    CASE WHEN $6 = 'queued'::work_item_status THEN NOW() END,
                    NOW(), NOW())
            ON CONFLICT (jurisdiction, locality_code, profession, source_type) DO UPDATE
            SET status = $6,
                queued_at = CASE WHEN $6 = 'queued'::work_item_status
                                 THEN NOW() ELSE work_items.queued_at END,
                completed_at = CASE WHEN $6 = 'completed'::work_item_status
                                    THEN NOW() ELSE work_items.completed_at END,
                attempt_count = CASE WHEN $6 = 'queued'::work_item_status
                                     THEN 0 ELSE work_items.attempt_count END,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&key.jurisdiction)
        .bind(&key.locality_code)
        .bind(&key.profession)
        .bind(&key.source_type)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        let items = sqlx::query_as::<_, WorkItem>(&format!(
            r#"
            SELECT {WORK_ITEM_COLUMNS}
            FROM work_items
            WHERE ($1::text IS NULL OR source_type = $1)
              AND ($2::work_item_status IS NULL OR status = $2)
            ORDER BY updated_at DESC
            "#
        ))
        .bind(&filter.source_type)
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn record_failure(&self, key: &WorkItemKey, error: &str) -> Result<i32> {
        let (attempt_count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE work_items
            SET attempt_count = attempt_count + 1,
                last_error = $5,
                updated_at = NOW()
            WHERE jurisdiction = $1 AND locality_code = $2
              AND profession = $3 AND source_type = $4
            RETURNING attempt_count
            "#,
        )
        .bind(&key.jurisdiction)
        .bind(&key.locality_code)
        .bind(&key.profession)
        .bind(&key.source_type)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempt_count)
    }

    async fn record_message(&self, entry: &MessageLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_messages
                (id, message_id, work_item_key, attempt_number, status,
                 started_at, finished_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.message_id)
        .bind(&entry.work_item_key)
        .bind(entry.attempt_number)
        .bind(entry.status)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ensure_rate_limit(&self, source_type: &str, requests_per_second: i32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits
                (source_type, requests_per_second, window_start, count_in_window,
                 is_throttled, updated_at)
            VALUES ($1, $2, date_trunc('second', NOW()), 0, false, NOW())
            ON CONFLICT (source_type) DO NOTHING
            "#,
        )
        .bind(source_type)
        .bind(requests_per_second)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_rate_limit(&self, source_type: &str) -> Result<Option<RateLimitState>> {
        let state = sqlx::query_as::<_, RateLimitState>(
            r#"
            SELECT source_type, requests_per_second, window_start,
                   count_in_window, is_throttled
            FROM rate_limits
            WHERE source_type = $1
            "#,
        )
        .bind(source_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn try_acquire(&self, source_type: &str) -> Result<bool> {
        self.ensure_rate_limit(source_type, self.default_requests_per_second)
            .await?;

        // One conditional UPDATE: callers serialize on the row lock, so
        // the ceiling cannot be over-admitted. A stale window resets to
        // count 1; a current window increments only below the ceiling.
        let admitted = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE rate_limits
            SET count_in_window = CASE
                    WHEN window_start < date_trunc('second', NOW()) THEN 1
                    ELSE count_in_window + 1
                END,
                window_start = CASE
                    WHEN window_start < date_trunc('second', NOW())
                    THEN date_trunc('second', NOW())
                    ELSE window_start
                END,
                is_throttled = false,
                updated_at = NOW()
            WHERE source_type = $1
              AND (window_start < date_trunc('second', NOW())
                   OR count_in_window < requests_per_second)
            RETURNING count_in_window
            "#,
        )
        .bind(source_type)
        .fetch_optional(&self.pool)
        .await?
        .is_some();

        if !admitted {
            sqlx::query(
                "UPDATE rate_limits SET is_throttled = true, updated_at = NOW() WHERE source_type = $1",
            )
            .bind(source_type)
            .execute(&self.pool)
            .await?;
        }

        Ok(admitted)
    }

    async fn upsert_scraped_record(&self, record: &LicenseRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_records
                (id, source_type, source_license_id, name, locality, profession,
                 license_status, phone, email, address, website,
                 scraped_at, first_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (source_type, source_license_id) DO UPDATE
            SET name = $4,
                locality = $5,
                profession = $6,
                license_status = $7,
                phone = $8,
                email = $9,
                address = $10,
                website = $11,
                scraped_at = $12
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.source_type)
        .bind(&record.source_license_id)
        .bind(&record.name)
        .bind(&record.locality)
        .bind(&record.profession)
        .bind(&record.license_status)
        .bind(&record.phone)
        .bind(&record.email)
        .bind(&record.address)
        .bind(&record.website)
        .bind(record.scraped_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn scraped_record_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scraped_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn counts_by_status(&self) -> Result<Vec<StatusCount>> {
        let counts = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT source_type, status, COUNT(*) AS count
            FROM work_items
            GROUP BY source_type, status
            ORDER BY source_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn rate_limit_states(&self) -> Result<Vec<RateLimitState>> {
        let states = sqlx::query_as::<_, RateLimitState>(
            r#"
            SELECT source_type, requests_per_second, window_start,
                   count_in_window, is_throttled
            FROM rate_limits
            ORDER BY source_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(states)
    }

    async fn schedules(&self) -> Result<Vec<ScheduleEntry>> {
        let entries = sqlx::query_as::<_, ScheduleEntry>(
            "SELECT source_type, cadence_secs, enabled, last_run_at FROM schedule ORDER BY source_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn mark_schedule_run(&self, source_type: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE schedule SET last_run_at = $2 WHERE source_type = $1")
            .bind(source_type)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_heartbeat(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (name, beat_at) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET beat_at = $2
            "#,
        )
        .bind(name)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn worker_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        let beats = sqlx::query_as::<_, Heartbeat>(
            "SELECT name, beat_at FROM heartbeats ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(beats)
    }

    async fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(finished_at) FROM queue_messages",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }
}
