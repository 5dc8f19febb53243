//! Append-only, concurrency-safe result collection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::result::EvaluationResult;

/// The run's result collection.
///
/// Results are produced by exactly one evaluation each and appended once;
/// nothing ever mutates or removes them. Clones share the same underlying
/// collection, which is how orchestrator workers on different threads
/// append into one run.
#[derive(Debug, Clone, Default)]
pub struct ResultCollection {
    inner: Arc<Mutex<Vec<EvaluationResult>>>,
}

impl ResultCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, result: EvaluationResult) {
        self.inner.lock().push(result);
    }

    pub fn extend(&self, results: impl IntoIterator<Item = EvaluationResult>) {
        self.inner.lock().extend(results);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of the results collected so far.
    pub fn snapshot(&self) -> Vec<EvaluationResult> {
        self.inner.lock().clone()
    }

    /// Consume the collection and return the results. Falls back to a
    /// snapshot when other clones are still alive.
    pub fn into_results(self) -> Vec<EvaluationResult> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        }
    }
}
