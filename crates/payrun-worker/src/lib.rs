//! Payrun Worker
//!
//! Worker-side processing engine for CSV payment-instruction uploads:
//!
//! - **Lease Coordinator**: at-most-one-lease claim/heartbeat/release over
//!   ingestion jobs and validation chunks (`FOR UPDATE SKIP LOCKED`)
//! - **CSV Ingestor**: tolerant parsing of persisted raw bytes into rows
//! - **Chunk Planner**: deterministic partitioning into leasable chunks
//! - **Validation Engine**: compiled, operator-editable rule evaluation
//! - **Finalizer**: exactly-once terminal aggregation per upload
//! - **Notifier**: best-effort lifecycle events to the intake API
//!
//! Multiple worker processes run this engine concurrently against the same
//! database; every coordination fact (locks, heartbeats, attempts,
//! counters) is durable, so workers share nothing in memory.

pub mod config;
pub mod db;
pub mod finalize;
pub mod ingest;
pub mod lease;
pub mod models;
pub mod notify;
pub mod validation;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use notify::Notifier;
pub use worker::Worker;
