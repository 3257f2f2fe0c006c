//! # Tandem Engine
//!
//! Change-capture replication from a primary store to a secondary store.
//!
//! This crate provides:
//! - Lifecycle hooks driven by the primary store's transaction wrapper
//! - Batch replay (delete → update → insert) with insert/update fallback
//! - Scoped target sessions with guaranteed commit-or-rollback
//! - Bounded retries with a durable JSON Lines failure log
//! - A process-wide enable switch and bulk-sync mutual exclusion
//! - An in-memory target store (`memory://`)
//!
//! ## Architecture
//!
//! ```text
//! mutation ─► LifecycleHooks ─► ChangeBuffer (per unit of work)
//!                  │ post-commit
//!                  ▼
//!             Dispatcher ─► RetryCoordinator ─► ReplayEngine ─► TargetSession
//!                                   │
//!                                   └─► FailureSink
//! ```
//!
//! ## Key Invariants
//!
//! - Nothing is replicated before the primary commit succeeds
//! - Rollback discards captured changes without touching the target
//! - One batch replays in one target session, one batch at a time
//! - Replication errors never reach the primary transaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod control;
mod dispatch;
mod error;
mod failure;
mod hooks;
mod memory;
mod replay;
mod retry;
mod service;
mod session;
mod stats;
mod target;

pub use config::{Backoff, DispatchMode, ReplicationConfig, RetryConfig};
pub use control::{OperationGuard, PauseGuard, SyncControl};
pub use dispatch::Dispatcher;
pub use error::{EngineError, EngineResult};
pub use failure::{
    change_set_from_failures, read_failure_log, FailureRecord, FailureSink, JsonLinesFailureLog,
    MemoryFailureLog, TracingFailureLog,
};
pub use hooks::{LifecycleHooks, UnitOfWork, UnitState};
pub use memory::{MemoryTarget, MEMORY_SCHEME};
pub use replay::{RecordError, ReplayEngine, ReplayResult};
pub use retry::{ReplicationCounters, ReplicationOutcome, RetryCoordinator};
pub use service::{BulkSyncOutcome, BulkSyncReport, Replicator, SkipReason};
pub use session::{ResetReport, TargetSessionManager};
pub use stats::{PendingCounts, PendingTracker, SyncStats};
pub use target::{
    PoolStatus, Row, SessionOptions, TargetError, TargetOptions, TargetResult, TargetSession,
    TargetStore,
};

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
