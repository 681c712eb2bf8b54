//! Worker lifecycle: one detached worker process per working directory.
//!
//! Core components:
//! - `process`: worker identity tokens and OS liveness checks
//! - `launcher`: spawning detached worker processes
//! - `supervisor`: lazy start, registration, dead-worker replacement

pub mod launcher;
pub mod process;
pub mod supervisor;

pub use launcher::{ProcessLauncher, WorkerLaunch, WorkerLauncher};
pub use process::WorkerToken;
pub use supervisor::{SupervisorOutcome, WorkerSupervisor};
