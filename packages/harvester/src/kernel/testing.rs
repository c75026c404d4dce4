//! In-process doubles for the kernel seams.
//!
//! `MemoryStateStore` and `InMemoryQueue` implement the same traits as
//! the Postgres backends with plain maps behind a mutex, so scenario
//! tests can exercise the seeder/consumer/coordinator pipeline without
//! a database. The in-memory queue redelivers immediately (no backoff
//! sleep) to keep tests fast.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use registry_extraction::LicenseRecord;

use super::queue::{Delivery, NackOutcome, QueuePayload, WorkQueue};
use super::store::{
    Heartbeat, MessageLogEntry, RateLimitState, ScheduleEntry, StateStore, StatusCount, WorkItem,
    WorkItemFilter, WorkItemKey, WorkItemStatus,
};

// ============================================================================
// MemoryStateStore
// ============================================================================

#[derive(Default)]
struct StoreInner {
    work_items: HashMap<WorkItemKey, WorkItem>,
    messages: Vec<MessageLogEntry>,
    rate_limits: HashMap<String, RateLimitState>,
    scraped: HashMap<(String, String), LicenseRecord>,
    schedules: HashMap<String, ScheduleEntry>,
    heartbeats: HashMap<String, DateTime<Utc>>,
}

pub struct MemoryStateStore {
    inner: Mutex<StoreInner>,
    default_requests_per_second: i32,
}

impl MemoryStateStore {
    pub fn new(default_requests_per_second: i32) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            default_requests_per_second,
        }
    }

    /// Pre-load a schedule row (tests drive the coordinator with it).
    pub async fn put_schedule(&self, entry: ScheduleEntry) {
        let mut inner = self.inner.lock().await;
        inner.schedules.insert(entry.source_type.clone(), entry);
    }

    /// All audit rows recorded so far, oldest first.
    pub async fn message_log(&self) -> Vec<MessageLogEntry> {
        self.inner.lock().await.messages.clone()
    }

    /// All harvested records, for assertions.
    pub async fn scraped_records(&self) -> Vec<LicenseRecord> {
        self.inner.lock().await.scraped.values().cloned().collect()
    }

    fn window_of(now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(chrono::Duration::seconds(1)).unwrap_or(now)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_work_item(&self, key: &WorkItemKey) -> Result<Option<WorkItem>> {
        Ok(self.inner.lock().await.work_items.get(key).cloned())
    }

    async fn upsert_work_item(&self, key: &WorkItemKey, status: WorkItemStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let item = inner.work_items.entry(key.clone()).or_insert_with(|| WorkItem {
            id: Uuid::new_v4(),
            jurisdiction: key.jurisdiction.clone(),
            locality_code: key.locality_code.clone(),
            profession: key.profession.clone(),
            source_type: key.source_type.clone(),
            status,
            attempt_count: 0,
            last_error: None,
            queued_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        });
        item.status = status;
        item.updated_at = now;
        match status {
            WorkItemStatus::Queued => {
                item.queued_at = Some(now);
                item.attempt_count = 0;
            }
            WorkItemStatus::Completed => item.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    async fn find_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .work_items
            .values()
            .filter(|item| {
                filter
                    .source_type
                    .as_ref()
                    .map_or(true, |s| &item.source_type == s)
                    && filter.status.map_or(true, |s| item.status == s)
            })
            .cloned()
            .collect())
    }

    async fn record_failure(&self, key: &WorkItemKey, error: &str) -> Result<i32> {
        let mut inner = self.inner.lock().await;
        let Some(item) = inner.work_items.get_mut(key) else {
            bail!("work item not found: {key}");
        };
        item.attempt_count += 1;
        item.last_error = Some(error.to_string());
        item.updated_at = Utc::now();
        Ok(item.attempt_count)
    }

    async fn record_message(&self, entry: &MessageLogEntry) -> Result<()> {
        self.inner.lock().await.messages.push(entry.clone());
        Ok(())
    }

    async fn ensure_rate_limit(&self, source_type: &str, requests_per_second: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .rate_limits
            .entry(source_type.to_string())
            .or_insert_with(|| RateLimitState {
                source_type: source_type.to_string(),
                requests_per_second,
                window_start: Self::window_of(Utc::now()),
                count_in_window: 0,
                is_throttled: false,
            });
        Ok(())
    }

    async fn get_rate_limit(&self, source_type: &str) -> Result<Option<RateLimitState>> {
        Ok(self.inner.lock().await.rate_limits.get(source_type).cloned())
    }

    async fn try_acquire(&self, source_type: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let default_rps = self.default_requests_per_second;
        let window = Self::window_of(Utc::now());
        let state = inner
            .rate_limits
            .entry(source_type.to_string())
            .or_insert_with(|| RateLimitState {
                source_type: source_type.to_string(),
                requests_per_second: default_rps,
                window_start: window,
                count_in_window: 0,
                is_throttled: false,
            });

        if state.window_start < window {
            state.window_start = window;
            state.count_in_window = 1;
            state.is_throttled = false;
            Ok(true)
        } else if state.count_in_window < state.requests_per_second {
            state.count_in_window += 1;
            state.is_throttled = false;
            Ok(true)
        } else {
            state.is_throttled = true;
            Ok(false)
        }
    }

    async fn upsert_scraped_record(&self, record: &LicenseRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.scraped.insert(
            (record.source_type.clone(), record.source_license_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn scraped_record_count(&self) -> Result<i64> {
        Ok(self.inner.lock().await.scraped.len() as i64)
    }

    async fn counts_by_status(&self) -> Result<Vec<StatusCount>> {
        let inner = self.inner.lock().await;
        let mut counts: HashMap<(String, WorkItemStatus), i64> = HashMap::new();
        for item in inner.work_items.values() {
            *counts
                .entry((item.source_type.clone(), item.status))
                .or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((source_type, status), count)| StatusCount {
                source_type,
                status,
                count,
            })
            .collect())
    }

    async fn rate_limit_states(&self) -> Result<Vec<RateLimitState>> {
        Ok(self.inner.lock().await.rate_limits.values().cloned().collect())
    }

    async fn schedules(&self) -> Result<Vec<ScheduleEntry>> {
        Ok(self.inner.lock().await.schedules.values().cloned().collect())
    }

    async fn mark_schedule_run(&self, source_type: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.schedules.get_mut(source_type) {
            entry.last_run_at = Some(at);
        }
        Ok(())
    }

    async fn record_heartbeat(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.lock().await.heartbeats.insert(name.to_string(), at);
        Ok(())
    }

    async fn worker_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        Ok(self
            .inner
            .lock()
            .await
            .heartbeats
            .iter()
            .map(|(name, beat_at)| Heartbeat {
                name: name.clone(),
                beat_at: *beat_at,
            })
            .collect())
    }

    async fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .map(|m| m.finished_at)
            .max())
    }
}

// ============================================================================
// InMemoryQueue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    Pending,
    Running,
    Succeeded,
    DeadLetter,
}

struct QueuedMessage {
    id: Uuid,
    payload: QueuePayload,
    state: MessageState,
    attempt: i32,
}

/// At-least-once queue double with immediate redelivery.
pub struct InMemoryQueue {
    inner: Mutex<Vec<QueuedMessage>>,
    max_retries: i32,
}

impl InMemoryQueue {
    pub fn new(max_retries: i32) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            max_retries,
        }
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn publish(&self, payload: &QueuePayload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.inner.lock().await.push(QueuedMessage {
            id,
            payload: payload.clone(),
            state: MessageState::Pending,
            attempt: 0,
        });
        Ok(id)
    }

    async fn claim(&self, _worker_id: &str, limit: i64) -> Result<Vec<Delivery>> {
        let mut inner = self.inner.lock().await;
        let mut deliveries = Vec::new();
        for message in inner.iter_mut() {
            if deliveries.len() as i64 >= limit {
                break;
            }
            if message.state == MessageState::Pending {
                message.state = MessageState::Running;
                message.attempt += 1;
                deliveries.push(Delivery {
                    id: message.id,
                    payload: message.payload.clone(),
                    attempt: message.attempt,
                });
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(message) = inner.iter_mut().find(|m| m.id == delivery_id) else {
            bail!("unknown delivery: {delivery_id}");
        };
        message.state = MessageState::Succeeded;
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid, _error: &str) -> Result<NackOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(message) = inner.iter_mut().find(|m| m.id == delivery_id) else {
            bail!("unknown delivery: {delivery_id}");
        };
        if message.attempt <= self.max_retries {
            message.state = MessageState::Pending;
            Ok(NackOutcome::Requeued {
                next_run_at: Utc::now(),
            })
        } else {
            message.state = MessageState::DeadLetter;
            Ok(NackOutcome::DeadLettered)
        }
    }

    async fn depth(&self) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .iter()
            .filter(|m| matches!(m.state, MessageState::Pending | MessageState::Running))
            .count() as i64)
    }

    async fn dead_letter_count(&self) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .iter()
            .filter(|m| m.state == MessageState::DeadLetter)
            .count() as i64)
    }
}
