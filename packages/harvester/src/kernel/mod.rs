//! Orchestration kernel: durable state, queueing, seeding, consuming,
//! and the periodic coordinator.

pub mod consumer;
pub mod coordinator;
pub mod queue;
pub mod seeder;
pub mod store;
pub mod testing;

pub use consumer::{Consumer, ConsumerConfig};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorReport};
pub use queue::{Delivery, NackOutcome, PgWorkQueue, QueuePayload, WorkQueue};
pub use seeder::{SeedMode, SeedSummary, Seeder, SeederConfig, TEST_LOCALITIES};
pub use store::{
    AttemptStatus, Heartbeat, MessageLogEntry, PgStateStore, RateLimitState, ScheduleEntry,
    StateStore, StatusCount, WorkItem, WorkItemFilter, WorkItemKey, WorkItemStatus,
};
