//! Mocap Jobs: a file-backed job queue with a lazily started worker.
//!
//! Producers enqueue scaling jobs into a queue file shared by every process
//! on the host. A single detached worker per working directory drains the
//! queue, running the external workflow for each job, and exits when idle.

pub mod config;
pub mod error;
pub mod jobs;
pub mod producer;
pub mod store;
pub mod worker;
pub mod workflow;
