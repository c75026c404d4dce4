// Licensing Record Harvester - Core
//
// Job-orchestration service that enumerates (jurisdiction, locality,
// profession, source) work, queues it durably, and extracts licensing
// records from rate-limited external registries.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
