//! Job records and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::process::WorkerToken;

/// Label reported for an id with no record in the queue.
pub const UNKNOWN_STATE: &str = "unknown";

/// State of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for the worker to claim it.
    Queued,
    /// Claimed by the worker; the external tool is (or was) running.
    Running,
    /// The tool exited cleanly and the output was archived.
    Finished,
    /// The tool failed, or the job could not be executed.
    Error,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Queued, Running) | (Running, Finished) | (Running, Error)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Render an optional state, using [`UNKNOWN_STATE`] for a missing record.
    pub fn label(state: Option<JobState>) -> String {
        state.map_or_else(|| UNKNOWN_STATE.to_string(), |s| s.to_string())
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A job record as persisted in the queue file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Producer-generated id, stable for the job's lifetime.
    pub id: Uuid,
    /// Opaque configuration understood only by the workflow executor.
    pub payload: serde_json::Value,
    /// Pid of the producer that created the job.
    pub owner_pid: u32,
    /// Current state.
    pub state: JobState,
    /// Identity of the worker that claimed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerToken>,
    /// When the job was claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job owned by the current process.
    pub fn new(payload: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// Create a queued job with a caller-chosen id.
    pub fn with_id(id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            owner_pid: std::process::id(),
            state: JobState::Queued,
            worker: None,
            claimed_at: None,
            finished_at: None,
        }
    }

    /// Whether `other` refers to this record (same id and same producer).
    pub fn matches(&self, other: &Job) -> bool {
        self.id == other.id && self.owner_pid == other.owner_pid
    }

    /// Move to `target` if the state machine allows it.
    ///
    /// Stamps `claimed_at` on claim and `finished_at` on a terminal state.
    pub fn transition_to(&mut self, target: JobState) -> Result<(), String> {
        if !self.state.can_transition_to(target) {
            return Err(format!(
                "Cannot transition job {} from {} to {}",
                self.id, self.state, target
            ));
        }

        self.state = target;
        match target {
            JobState::Running => self.claimed_at = Some(Utc::now()),
            JobState::Finished | JobState::Error => self.finished_at = Some(Utc::now()),
            JobState::Queued => {}
        }
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            state: self.state,
        }
    }
}

/// The `{id, state}` view returned by listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub state: JobState,
}
