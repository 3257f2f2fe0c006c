//! Process-wide sync switch and the bulk-operation registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SyncState {
    enabled: AtomicBool,
    active: Mutex<HashMap<String, Registration>>,
    next_token: AtomicU64,
    ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    token: u64,
    started: Instant,
}

/// Enable/disable switch plus a mutual-exclusion registry for bulk and
/// manual synchronization runs.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SyncControl {
    state: Arc<SyncState>,
}

impl SyncControl {
    /// Creates a control plane.
    ///
    /// Registrations older than `ttl` are treated as abandoned.
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            state: Arc::new(SyncState {
                enabled: AtomicBool::new(enabled),
                active: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                ttl,
            }),
        }
    }

    /// Enables replication.
    pub fn enable(&self) {
        if !self.state.enabled.swap(true, Ordering::SeqCst) {
            tracing::info!("replication enabled");
        }
    }

    /// Disables replication; capture and replay are skipped while off.
    pub fn disable(&self) {
        if self.state.enabled.swap(false, Ordering::SeqCst) {
            tracing::info!("replication disabled");
        }
    }

    /// Returns true if replication is enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    /// Disables replication until the returned guard is dropped, then
    /// restores the previous state.
    pub fn pause(&self) -> PauseGuard {
        let was_enabled = self.state.enabled.swap(false, Ordering::SeqCst);
        tracing::debug!(was_enabled, "replication paused");
        PauseGuard {
            control: self.clone(),
            was_enabled,
        }
    }

    /// Registers an operation if none is running.
    ///
    /// Returns false, and registers nothing, when any operation is
    /// already active.
    pub fn try_register(&self, operation_id: &str) -> bool {
        self.acquire(operation_id).is_some()
    }

    fn acquire(&self, operation_id: &str) -> Option<u64> {
        let mut active = self.state.active.lock();
        self.evict_stale(&mut active);

        if !active.is_empty() {
            tracing::info!(
                operation_id,
                running = ?active.keys().collect::<Vec<_>>(),
                "sync already running, skipping"
            );
            return None;
        }
        let token = self.state.next_token.fetch_add(1, Ordering::SeqCst);
        active.insert(
            operation_id.to_string(),
            Registration {
                token,
                started: Instant::now(),
            },
        );
        tracing::debug!(operation_id, token, "sync operation registered");
        Some(token)
    }

    /// Removes an operation registration.
    pub fn unregister(&self, operation_id: &str) {
        if self.state.active.lock().remove(operation_id).is_some() {
            tracing::debug!(operation_id, "sync operation unregistered");
        }
    }

    /// Registers an operation, unregistering it when the guard drops.
    ///
    /// The guard only removes its own registration. If it expired and the
    /// same id was registered again, dropping the old guard leaves the new
    /// registration in place.
    pub fn register(&self, operation_id: &str) -> Option<OperationGuard> {
        self.acquire(operation_id).map(|token| OperationGuard {
            control: self.clone(),
            operation_id: operation_id.to_string(),
            token,
        })
    }

    fn release(&self, operation_id: &str, token: u64) {
        let mut active = self.state.active.lock();
        match active.get(operation_id).map(|registration| registration.token) {
            Some(current) if current == token => {
                active.remove(operation_id);
                tracing::debug!(operation_id, "sync operation unregistered");
            }
            Some(_) => {
                tracing::debug!(operation_id, "registration was replaced, leaving it in place");
            }
            None => {}
        }
    }

    /// Returns true if any operation is registered.
    pub fn is_running(&self) -> bool {
        let mut active = self.state.active.lock();
        self.evict_stale(&mut active);
        !active.is_empty()
    }

    /// Returns the registered operation ids, sorted.
    pub fn active_operations(&self) -> Vec<String> {
        let mut active = self.state.active.lock();
        self.evict_stale(&mut active);
        let mut ids: Vec<String> = active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops every registration, returning how many were removed.
    pub fn clear_all(&self) -> usize {
        let mut active = self.state.active.lock();
        let cleared = active.len();
        active.clear();
        if cleared > 0 {
            tracing::warn!(cleared, "cleared all sync operation registrations");
        }
        cleared
    }

    fn evict_stale(&self, active: &mut HashMap<String, Registration>) {
        let ttl = self.state.ttl;
        active.retain(|operation_id, registration| {
            let fresh = registration.started.elapsed() < ttl;
            if !fresh {
                tracing::warn!(operation_id = %operation_id, "evicting abandoned sync operation");
            }
            fresh
        });
    }
}

/// Restores the previous enabled state on drop.
#[derive(Debug)]
#[must_use = "replication resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    control: SyncControl,
    was_enabled: bool,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            self.control.enable();
        }
    }
}

/// Unregisters its operation on drop, including during unwinding.
#[derive(Debug)]
#[must_use = "the operation is unregistered as soon as the guard is dropped"]
pub struct OperationGuard {
    control: SyncControl,
    operation_id: String,
    token: u64,
}

impl OperationGuard {
    /// Returns the operation id.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.control.release(&self.operation_id, self.token);
    }
}
