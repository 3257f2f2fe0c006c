//! Scoped target sessions.
//!
//! [`TargetSessionManager::with_session`] is the only way the engine opens a
//! session: commit on success, rollback on failure, and rollback when the
//! closure unwinds. A session never outlives the call.

use crate::target::{
    PoolStatus, SessionOptions, TargetError, TargetResult, TargetSession, TargetStore,
};
use serde::Serialize;
use std::sync::Arc;

/// Pool status before and after an emergency reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// Status observed before disposal.
    pub before: PoolStatus,
    /// Status observed after disposal.
    pub after: PoolStatus,
}

/// Hands out scoped sessions against a target store.
pub struct TargetSessionManager {
    store: Arc<dyn TargetStore>,
    options: SessionOptions,
}

impl TargetSessionManager {
    /// Creates a manager over a store.
    pub fn new(store: Arc<dyn TargetStore>, options: SessionOptions) -> Self {
        Self { store, options }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    /// Runs `f` inside a fresh session.
    ///
    /// The session is committed when `f` returns `Ok` and rolled back when
    /// it returns `Err` or panics. A failed commit is reported as the error.
    pub fn with_session<T, F>(&self, f: F) -> TargetResult<T>
    where
        F: FnOnce(&mut dyn TargetSession) -> TargetResult<T>,
    {
        let mut guard = SessionGuard {
            session: Some(self.store.begin(&self.options)?),
        };
        let result = f(guard.session_mut()?);
        let session = guard.release()?;

        match result {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback() {
                    tracing::warn!(error = %rollback_err, "session rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Performs a connectivity round trip.
    pub fn ping(&self) -> TargetResult<()> {
        self.store.ping()
    }

    /// Returns the current pool status.
    pub fn pool_status(&self) -> PoolStatus {
        self.store.pool_status()
    }

    /// Disposes the pool, returning its status before and after.
    pub fn reset(&self) -> ResetReport {
        let before = self.store.pool_status();
        self.store.dispose();
        let after = self.store.pool_status();
        tracing::warn!(
            checked_out_before = before.checked_out,
            checked_out_after = after.checked_out,
            "target connection pool disposed"
        );
        ResetReport { before, after }
    }
}

impl std::fmt::Debug for TargetSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSessionManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Rolls the session back if it is still held when dropped (unwind path).
struct SessionGuard {
    session: Option<Box<dyn TargetSession>>,
}

impl SessionGuard {
    fn session_mut(&mut self) -> TargetResult<&mut (dyn TargetSession + 'static)> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(TargetError::Session("session already closed".into())),
        }
    }

    fn release(&mut self) -> TargetResult<Box<dyn TargetSession>> {
        self.session
            .take()
            .ok_or_else(|| TargetError::Session("session already closed".into()))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.rollback();
        }
    }
}
