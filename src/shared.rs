//! A task graph shared between threads.
//!
//! Merges are serialized: [`SharedGraph::commit`] holds the lock from the
//! moment it reads the current graph until the new one is swapped in, so two
//! concurrent add-task merges never allocate the same ID. Readers take a
//! [`snapshot`](SharedGraph::snapshot) and assemble context without blocking
//! writers for longer than a clone.

use crate::error::{Error, Result};
use crate::reconcile::{MergeEngine, MergeRequest, Merged};
use crate::tasks::TaskGraph;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to one graph with a single writer at a time.
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<Mutex<TaskGraph>>,
}

impl SharedGraph {
    /// Wrap `graph`.
    #[must_use]
    pub fn new(graph: TaskGraph) -> Self {
        Self { inner: Arc::new(Mutex::new(graph)) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TaskGraph>> {
        self.inner.lock().map_err(|e| Error::InvalidGraph(format!("graph lock poisoned: {e}")))
    }

    /// A copy of the current graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous writer panicked while holding the lock.
    pub fn snapshot(&self) -> Result<TaskGraph> {
        Ok(self.lock()?.clone())
    }

    /// Apply `request` against the current graph and swap in the result.
    ///
    /// On failure the shared graph is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Merge`] if the engine refuses the merge.
    pub fn commit(&self, engine: &MergeEngine, request: &MergeRequest) -> Result<Merged> {
        let mut guard = self.lock()?;
        let merged = engine.apply(&guard, request)?;
        *guard = merged.graph.clone();
        Ok(merged)
    }
}
