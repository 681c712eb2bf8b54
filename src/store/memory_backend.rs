//! In-memory backend for tests and single-process embedding.

use std::sync::{Mutex, MutexGuard};

use crate::error::QueueError;
use crate::jobs::model::Job;
use crate::store::traits::{QueueStore, QueueTxn};

/// Queue store backed by a mutex-guarded vector.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current list without taking part in a transaction.
    pub fn snapshot(&self) -> Vec<Job> {
        self.guard().clone()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Job>> {
        // A panic inside a transaction leaves the last saved list intact.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl QueueStore for MemoryQueueStore {
    fn acquire_exclusive(&self) -> Result<Box<dyn QueueTxn + '_>, QueueError> {
        Ok(Box::new(MemoryTxn {
            jobs: self.guard(),
        }))
    }
}

struct MemoryTxn<'a> {
    jobs: MutexGuard<'a, Vec<Job>>,
}

impl QueueTxn for MemoryTxn<'_> {
    fn load(&mut self) -> Vec<Job> {
        self.jobs.clone()
    }

    fn save(&mut self, jobs: &[Job]) -> Result<(), QueueError> {
        *self.jobs = jobs.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsaved_changes_are_discarded() {
        let store = MemoryQueueStore::new();
        {
            let mut txn = store.acquire_exclusive().unwrap();
            let mut jobs = txn.load();
            jobs.push(Job::new(serde_json::json!({})));
        }
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn saved_changes_persist() {
        let store = MemoryQueueStore::new();
        let job = Job::new(serde_json::json!({"k": 1}));
        {
            let mut txn = store.acquire_exclusive().unwrap();
            txn.save(std::slice::from_ref(&job)).unwrap();
        }
        assert_eq!(store.snapshot(), vec![job]);
    }
}
