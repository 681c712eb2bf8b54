//! Error types for the job queue, worker supervisor, and workflow executor.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Queue store errors.
///
/// Corrupt queue content is never reported here; it is recovered as an
/// empty queue. These are genuine I/O faults only.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write queue file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue task failed: {0}")]
    Task(String),
}

/// Worker supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to lock worker registration {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write worker registration {path}: {source}")]
    Register {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn worker {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Supervisor task failed: {0}")]
    Task(String),
}

/// Workflow execution errors. Each one fails the job, never the worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Job {id} has an invalid payload: {reason}")]
    InvalidPayload { id: Uuid, reason: String },

    #[error("Failed to patch config {path}: {reason}")]
    ConfigPatch { path: PathBuf, reason: String },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("Failed to archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
