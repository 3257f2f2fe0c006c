//! Target store abstraction.
//!
//! The secondary store is reached through two traits: [`TargetStore`]
//! (connectivity, pooling) and [`TargetSession`] (one open transaction).
//! Sessions are consumed by `commit`/`rollback`, so a finished session
//! cannot be used again; dropping an unfinished session must roll it back.

use std::time::Duration;
use tandem_model::FieldMap;
use thiserror::Error;

/// A row on the target side, keyed by column name.
pub type Row = FieldMap;

/// Result type for target store operations.
pub type TargetResult<T> = Result<T, TargetError>;

/// Errors reported by a target store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TargetError {
    /// The store could not be reached.
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// A call exceeded its timeout.
    #[error("target call timed out after {0:?}")]
    Timeout(Duration),

    /// An insert collided with an existing unique value.
    #[error("unique constraint violated on {entity_kind} ({constraint})")]
    UniqueViolation {
        /// Table / entity kind.
        entity_kind: String,
        /// Offending constraint or key.
        constraint: String,
    },

    /// The store has no table for this kind.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The store refused the write.
    #[error("write rejected on {entity_kind}: {message}")]
    Rejected {
        /// Table / entity kind.
        entity_kind: String,
        /// Reason given by the store.
        message: String,
    },

    /// Savepoint misuse or other session protocol error.
    #[error("session error: {0}")]
    Session(String),

    /// The connection URI is not understood.
    #[error("invalid target uri: {0}")]
    InvalidUri(String),
}

impl TargetError {
    /// Returns true for connectivity failures (unreachable or timed out).
    ///
    /// These abort a whole batch so it can be retried; every other error is
    /// confined to the record that caused it.
    pub fn is_connection(&self) -> bool {
        matches!(self, TargetError::Unreachable(_) | TargetError::Timeout(_))
    }

    /// Returns true for unique-constraint violations.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, TargetError::UniqueViolation { .. })
    }
}

/// Engine options handed to a target store at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOptions {
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Timeout for a single statement.
    pub statement_timeout: Duration,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-session options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Timeout for a single statement within the session.
    pub statement_timeout: Duration,
}

/// Snapshot of a target connection pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    /// Configured pool size.
    pub size: usize,
    /// Connections currently handed out.
    pub checked_out: usize,
    /// Connections available for checkout.
    pub available: usize,
    /// How many times the pool has been disposed.
    pub disposals: u64,
}

/// A connection to the secondary store.
pub trait TargetStore: Send + Sync {
    /// Performs a trivial round trip to verify connectivity.
    fn ping(&self) -> TargetResult<()>;

    /// Opens a session (transaction) on the store.
    fn begin(&self, options: &SessionOptions) -> TargetResult<Box<dyn TargetSession>>;

    /// Returns the current pool status.
    fn pool_status(&self) -> PoolStatus;

    /// Closes every pooled connection; later calls reconnect lazily.
    fn dispose(&self);
}

/// One open transaction against the secondary store.
///
/// Key filters are column to value maps; a row matches when every filter
/// column equals the row's value.
pub trait TargetSession: Send {
    /// Finds a row by key filter.
    fn find(&mut self, kind: &str, key: &FieldMap) -> TargetResult<Option<Row>>;

    /// Inserts a new row.
    ///
    /// Fails with [`TargetError::UniqueViolation`] on key or unique column
    /// collisions.
    fn insert(&mut self, kind: &str, row: &Row) -> TargetResult<()>;

    /// Overwrites the given columns of the matching row.
    ///
    /// Returns false if no row matched.
    fn update(&mut self, kind: &str, key: &FieldMap, changes: &Row) -> TargetResult<bool>;

    /// Deletes the matching row. Returns false if no row matched.
    fn delete(&mut self, kind: &str, key: &FieldMap) -> TargetResult<bool>;

    /// Opens a nested savepoint.
    fn savepoint(&mut self) -> TargetResult<()>;

    /// Undoes everything since the innermost savepoint and closes it.
    fn rollback_to_savepoint(&mut self) -> TargetResult<()>;

    /// Closes the innermost savepoint, keeping its changes.
    fn release_savepoint(&mut self) -> TargetResult<()>;

    /// Commits and closes the session.
    fn commit(self: Box<Self>) -> TargetResult<()>;

    /// Rolls back and closes the session.
    fn rollback(self: Box<Self>) -> TargetResult<()>;
}
