//! `QueueStore` trait: the single persistence seam for the job queue.
//!
//! Every read-modify-write of the queue happens inside one transaction
//! obtained from [`QueueStore::acquire_exclusive`]. The transaction guard
//! holds the store's exclusive lock and releases it when dropped, so the
//! lock is released on every exit path of the critical section.

use crate::error::QueueError;
use crate::jobs::model::Job;

/// Backend-agnostic storage for the ordered job list.
pub trait QueueStore: Send + Sync {
    /// Block until the exclusive lock is held and return the transaction.
    fn acquire_exclusive(&self) -> Result<Box<dyn QueueTxn + '_>, QueueError>;
}

/// An open, exclusively locked view of the queue.
pub trait QueueTxn {
    /// Read the full job list.
    ///
    /// Missing or unparseable content yields an empty list.
    fn load(&mut self) -> Vec<Job>;

    /// Replace the full job list.
    fn save(&mut self, jobs: &[Job]) -> Result<(), QueueError>;
}
