use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::errors::{AppError, AppResult};

use super::upload_queue::{RunState, SelectedFile, UploadTracker};

/// Overall run progress as a whole percentage. Only a finished run reaches 100.
pub fn overall_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed.min(total) * 100) / total) as u8
}

/// Point-in-time copy of the tracker, published after every mutation
#[derive(Debug, Clone, Default)]
pub struct BatchSnapshot {
    pub files: Vec<SelectedFile>,
    pub run_state: RunState,
    pub overall_progress: u8,
}

impl BatchSnapshot {
    fn capture(tracker: &UploadTracker) -> Self {
        let run_state = tracker.run_state();
        Self {
            files: tracker.batch().files().to_vec(),
            run_state,
            overall_progress: run_state.overall_progress(),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.run_state.is_running()
    }
}

/// Tracker state shared between the host-facing API and the upload loop.
///
/// Every read-modify-write happens under one lock that is never held across
/// an await, so two files' transitions cannot interleave.
#[derive(Debug)]
pub struct SharedTracker {
    state: Arc<Mutex<UploadTracker>>,
    snapshots: watch::Sender<BatchSnapshot>,
}

impl Default for SharedTracker {
    fn default() -> Self {
        let (snapshots, _) = watch::channel(BatchSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(UploadTracker::default())),
            snapshots,
        }
    }
}

impl SharedTracker {
    /// Mutate the tracker and publish a fresh snapshot
    pub fn update<F, R>(&self, operation: &str, f: F) -> AppResult<R>
    where
        F: FnOnce(&mut UploadTracker) -> AppResult<R>,
    {
        let (result, snapshot) = {
            let mut tracker = self.state.lock().map_err(|e| {
                log::error!("Failed to acquire tracker lock for {}: {}", operation, e);
                AppError::Internal(format!("tracker lock poisoned during {}", operation))
            })?;
            let result = f(&mut tracker);
            (result, BatchSnapshot::capture(&tracker))
        }; // MutexGuard is dropped here

        self.snapshots.send_replace(snapshot);
        result
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Stops a run between files. The request already in flight is allowed to
/// settle; files not yet visited stay pending. A request made while no run
/// is active is discarded when the next run starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::info!("Upload cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
