//! Persistence layer: the locked job list shared between processes.

pub mod file_backend;
pub mod memory_backend;
pub mod traits;

pub use file_backend::FileQueueStore;
pub use memory_backend::MemoryQueueStore;
pub use traits::{QueueStore, QueueTxn};
