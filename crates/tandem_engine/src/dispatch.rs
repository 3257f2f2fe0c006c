//! Hand-off of committed batches to the retry coordinator.
//!
//! Inline dispatch replicates on the committing thread after the primary
//! commit has returned. Background dispatch queues the batch for a single
//! worker thread, so the committing thread never waits on the target.

use crate::config::DispatchMode;
use crate::control::SyncControl;
use crate::error::{EngineError, EngineResult};
use crate::retry::{ReplicationOutcome, RetryCoordinator};
use crate::stats::{PendingCounts, PendingTracker};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tandem_model::ChangeSet;

/// Routes committed batches to replication.
pub struct Dispatcher {
    coordinator: Arc<RetryCoordinator>,
    control: SyncControl,
    pending: Arc<PendingTracker>,
    worker: Option<Worker>,
}

struct Worker {
    sender: Mutex<Option<Sender<ChangeSet>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher, spawning the worker for background mode.
    ///
    /// Batches reaching the dispatcher or its worker while `control` is
    /// disabled are dropped without contacting the target.
    pub fn new(
        mode: DispatchMode,
        coordinator: Arc<RetryCoordinator>,
        control: SyncControl,
        pending: Arc<PendingTracker>,
    ) -> EngineResult<Self> {
        let worker = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Background => Some(spawn_worker(
                Arc::clone(&coordinator),
                control.clone(),
                Arc::clone(&pending),
            )?),
        };
        Ok(Self {
            coordinator,
            control,
            pending,
            worker,
        })
    }

    /// Returns the dispatch mode.
    pub fn mode(&self) -> DispatchMode {
        if self.worker.is_some() {
            DispatchMode::Background
        } else {
            DispatchMode::Inline
        }
    }

    /// Dispatches a batch.
    ///
    /// Returns the outcome when replication ran on this thread, `None` when
    /// the batch was queued for the worker.
    pub fn dispatch(&self, changes: ChangeSet) -> Option<ReplicationOutcome> {
        if changes.is_empty() {
            return Some(ReplicationOutcome::Empty);
        }
        let changes = match &self.worker {
            Some(worker) => match worker.send(changes) {
                Ok(()) => return None,
                Err(changes) => {
                    tracing::warn!("replay worker stopped, replicating inline");
                    changes
                }
            },
            None => changes,
        };
        Some(replicate(&self.coordinator, &self.control, &self.pending, changes))
    }

    /// Stops the worker after it drains its queue.
    ///
    /// Inline dispatchers have nothing to stop. Later dispatches replicate
    /// inline.
    pub fn shutdown(&self) -> EngineResult<()> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };
        drop(worker.sender.lock().take());
        let handle = worker.handle.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| EngineError::WorkerStopped)?;
            tracing::debug!("replay worker stopped");
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Queues a batch, handing it back if the worker is gone.
    fn send(&self, changes: ChangeSet) -> Result<(), ChangeSet> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(changes).map_err(|e| e.0),
            None => Err(changes),
        }
    }
}

fn spawn_worker(
    coordinator: Arc<RetryCoordinator>,
    control: SyncControl,
    pending: Arc<PendingTracker>,
) -> EngineResult<Worker> {
    let (sender, receiver) = mpsc::channel::<ChangeSet>();
    let handle = std::thread::Builder::new()
        .name("tandem-replay".into())
        .spawn(move || {
            for changes in receiver {
                replicate(&coordinator, &control, &pending, changes);
            }
        })?;
    Ok(Worker {
        sender: Mutex::new(Some(sender)),
        handle: Mutex::new(Some(handle)),
    })
}

fn replicate(
    coordinator: &RetryCoordinator,
    control: &SyncControl,
    pending: &PendingTracker,
    changes: ChangeSet,
) -> ReplicationOutcome {
    let counts = PendingCounts::of(&changes);
    let outcome = if control.is_enabled() {
        coordinator.replicate(changes)
    } else {
        tracing::debug!(
            dropped = changes.len(),
            "replication disabled, dropping dispatched batch"
        );
        ReplicationOutcome::Disabled
    };
    pending.sub(counts);
    outcome
}
