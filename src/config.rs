//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::error::ConfigError;
use crate::worker::launcher::WorkerLaunch;

/// Queue file name used when `MOCAP_JOBS_QUEUE_FILE` is not set.
pub const DEFAULT_QUEUE_FILE: &str = "job_queue.json";

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause before each queue poll.
    pub poll_interval: Duration,
    /// Consecutive empty polls before the worker exits.
    pub max_idle_polls: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_idle_polls: 3,
        }
    }
}

/// Deployment configuration shared by producers and the worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared working directory; job directories live beneath it.
    pub work_dir: PathBuf,
    /// Workflow directory holding the tool's config files.
    pub workflow_dir: PathBuf,
    /// Program that runs the workflow.
    pub processing_exe: PathBuf,
    /// Queue file; its lock file sits next to it.
    pub queue_file: PathBuf,
    pub worker: WorkerConfig,
    /// Kill the tool after this long (unbounded when `None`).
    pub tool_timeout: Option<Duration>,
}

impl Config {
    /// Load from `MOCAP_JOBS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` as the variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<PathBuf, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let work_dir = absolute(required("MOCAP_JOBS_WORK_DIR")?, "MOCAP_JOBS_WORK_DIR")?;
        let workflow_dir =
            absolute(required("MOCAP_JOBS_WORKFLOW_DIR")?, "MOCAP_JOBS_WORKFLOW_DIR")?;

        // A bare program name is looked up on PATH; anything else is a path.
        let processing_exe = required("MOCAP_JOBS_PROCESSING_EXE")?;
        let processing_exe = if processing_exe.components().count() > 1 {
            absolute(processing_exe, "MOCAP_JOBS_PROCESSING_EXE")?
        } else {
            processing_exe
        };

        let queue_file = match lookup("MOCAP_JOBS_QUEUE_FILE").filter(|v| !v.trim().is_empty()) {
            Some(path) => absolute(PathBuf::from(path), "MOCAP_JOBS_QUEUE_FILE")?,
            None => work_dir.join(DEFAULT_QUEUE_FILE),
        };

        let defaults = WorkerConfig::default();
        let poll_interval = parse_number(&lookup, "MOCAP_JOBS_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_idle_polls = parse_number(&lookup, "MOCAP_JOBS_MAX_IDLE_POLLS")?
            .unwrap_or(defaults.max_idle_polls);
        if max_idle_polls == 0 {
            // A worker that never polls would be started on every submit and run nothing.
            return Err(ConfigError::InvalidValue {
                key: "MOCAP_JOBS_MAX_IDLE_POLLS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let tool_timeout =
            parse_number(&lookup, "MOCAP_JOBS_TOOL_TIMEOUT_SECS")?.map(Duration::from_secs);

        Ok(Self {
            work_dir,
            workflow_dir,
            processing_exe,
            queue_file,
            worker: WorkerConfig {
                poll_interval,
                max_idle_polls,
            },
            tool_timeout,
        })
    }

    /// Launch parameters for this deployment's worker.
    pub fn launch(&self) -> WorkerLaunch {
        WorkerLaunch {
            executable: self.processing_exe.clone(),
            workflow_dir: self.workflow_dir.clone(),
            working_dir: self.work_dir.clone(),
        }
    }

    /// Directory owned by job `id`.
    pub fn job_dir(&self, id: Uuid) -> PathBuf {
        job_dir(&self.work_dir, id)
    }
}

/// `<work_dir>/<id>`.
pub fn job_dir(work_dir: &Path, id: Uuid) -> PathBuf {
    work_dir.join(id.to_string())
}

/// Resolve `path` against the current directory.
///
/// Every process sharing a working directory must see the same paths, no
/// matter where it was started from.
pub fn absolute(path: PathBuf, key: &str) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot resolve {}: {e}", path.display()),
    })
}

fn parse_number<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}
