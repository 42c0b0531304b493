use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{CrewError, Result};

/// The job the view currently shows. Async work compares against it before
/// applying results.
#[derive(Debug, Clone)]
pub struct CurrentJob {
    tx: Arc<watch::Sender<Option<Uuid>>>,
}

impl Default for CurrentJob {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentJob {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, job_id: Option<Uuid>) {
        self.tx.send_replace(job_id);
    }

    pub fn get(&self) -> Option<Uuid> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Uuid>> {
        self.tx.subscribe()
    }

    /// Fails with `StaleJob` unless the view still shows `captured`.
    pub fn ensure(&self, captured: Uuid) -> Result<()> {
        let current = self.get();
        if current == Some(captured) {
            Ok(())
        } else {
            Err(CrewError::StaleJob {
                expected: captured,
                current,
            })
        }
    }
}

/// Per-job "operation in progress" slots with compare-and-set acquisition.
#[derive(Debug, Clone, Default)]
pub struct OperationLocks {
    busy: Arc<Mutex<HashSet<Uuid>>>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot for `job_id`, or `None` if another operation holds it.
    /// The slot is released when the permit drops, whatever the outcome.
    pub fn try_acquire(&self, job_id: Uuid) -> Option<OperationPermit> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(job_id) {
            return None;
        }
        tracing::debug!(job_id = %job_id, "Operation lock acquired");
        Some(OperationPermit {
            job_id,
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self, job_id: &Uuid) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }
}

#[derive(Debug)]
pub struct OperationPermit {
    job_id: Uuid,
    busy: Arc<Mutex<HashSet<Uuid>>>,
}

impl OperationPermit {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.job_id);
        tracing::debug!(job_id = %self.job_id, "Operation lock released");
    }
}
