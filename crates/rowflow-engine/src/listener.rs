//! Per-row observation of a running step copy.
//!
//! Listeners see every row a copy reads, writes or redirects to its error
//! hop, on the copy's own thread and before it moves on to the next row.
//! They can be attached and detached while the pipeline runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rowflow_types::{Row, RowSchema, StepId};

pub trait RowListener: Send + Sync {
    /// A row was taken from one of the copy's inputs.
    fn row_read(&self, _step: &StepId, _schema: &RowSchema, _row: &Row) {}

    /// A row was delivered on the copy's normal output.
    fn row_written(&self, _step: &StepId, _schema: &RowSchema, _row: &Row) {}

    /// A rejected row, diagnostics included, was sent to the error hop.
    fn error_row_written(&self, _step: &StepId, _schema: &RowSchema, _row: &Row) {}
}

#[derive(Default)]
pub(crate) struct RowListeners {
    active: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn RowListener>>>,
}

impl fmt::Debug for RowListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowListeners")
            .field("count", &self.read().len())
            .finish()
    }
}

impl RowListeners {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn RowListener>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, listener: Arc<dyn RowListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.push(listener);
        self.active.store(true, Ordering::Release);
    }

    /// Detach `listener` (matched by identity). Returns whether it was attached.
    pub(crate) fn remove(&self, listener: &Arc<dyn RowListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        self.active.store(!listeners.is_empty(), Ordering::Release);
        listeners.len() != before
    }

    /// Cheap check so the row path skips the lock when nobody listens.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn each(&self, f: impl Fn(&dyn RowListener)) {
        for listener in self.read().iter() {
            f(listener.as_ref());
        }
    }
}
