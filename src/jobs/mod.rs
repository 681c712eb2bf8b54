//! Job records and the queue API.

pub mod manager;
pub mod model;

pub use manager::JobManager;
pub use model::{Job, JobState, JobSummary, UNKNOWN_STATE};
