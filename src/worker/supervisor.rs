//! Worker supervisor: at most one live worker per working directory.
//!
//! The registration file `<working_dir>/workflow.pid` holds the token of the
//! worker believed to be running. It is only read or written under the
//! registration lock, and never deleted: a stale token is recognised by the
//! liveness check, not by explicit unregistration.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::store::file_backend::{lock_path_for, open_locked};
use crate::worker::launcher::{WorkerLaunch, WorkerLauncher};
use crate::worker::process::WorkerToken;

/// Registration file name inside the working directory.
pub const REGISTRATION_FILE: &str = "workflow.pid";

/// Path of the registration file for `working_dir`.
pub fn registration_path(working_dir: &Path) -> PathBuf {
    working_dir.join(REGISTRATION_FILE)
}

/// Result of [`WorkerSupervisor::ensure_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// A registered worker is alive; nothing was spawned.
    AlreadyRunning(WorkerToken),
    /// No live worker was found and a new one was started.
    Spawned(WorkerToken),
}

impl SupervisorOutcome {
    pub fn token(&self) -> WorkerToken {
        match self {
            Self::AlreadyRunning(token) | Self::Spawned(token) => *token,
        }
    }

    pub fn pid(&self) -> u32 {
        self.token().pid
    }
}

/// Lazily starts the worker for a working directory.
#[derive(Clone)]
pub struct WorkerSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
}

impl WorkerSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { launcher }
    }

    /// Start a worker for `launch.working_dir` unless a live one is registered.
    ///
    /// Safe to call on every job submission.
    pub async fn ensure_running(
        &self,
        launch: WorkerLaunch,
    ) -> Result<SupervisorOutcome, SupervisorError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.ensure_running_blocking(&launch))
            .await
            .map_err(|e| SupervisorError::Task(e.to_string()))?
    }

    /// Blocking form of [`ensure_running`](Self::ensure_running).
    pub fn ensure_running_blocking(
        &self,
        launch: &WorkerLaunch,
    ) -> Result<SupervisorOutcome, SupervisorError> {
        let path = registration_path(&launch.working_dir);
        let lock_path = lock_path_for(&path);
        let _lock = open_locked(&lock_path).map_err(|source| SupervisorError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        self.launcher.reap();

        if let Some(token) = read_registration(&path) {
            if token.is_alive() {
                debug!(pid = token.pid, "Worker already running");
                return Ok(SupervisorOutcome::AlreadyRunning(token));
            }
            debug!(pid = token.pid, "Registered worker is gone");
        }

        let pid = self.launcher.launch(launch)?;
        let token = WorkerToken::capture(pid);
        write_registration(&path, &token)?;

        info!(
            pid,
            working_dir = %launch.working_dir.display(),
            "Worker started"
        );
        Ok(SupervisorOutcome::Spawned(token))
    }

    /// The currently registered worker token, if any (not liveness-checked).
    pub fn registered(&self, working_dir: &Path) -> Result<Option<WorkerToken>, SupervisorError> {
        let path = registration_path(working_dir);
        let lock_path = lock_path_for(&path);
        let _lock = open_locked(&lock_path).map_err(|source| SupervisorError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        Ok(read_registration(&path))
    }
}

fn read_registration(path: &Path) -> Option<WorkerToken> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let token = WorkerToken::parse(&raw);
            if token.is_none() && !raw.trim().is_empty() {
                warn!(path = %path.display(), "Unreadable worker registration, ignoring");
            }
            token
        }
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read worker registration: {e}");
            None
        }
    }
}

fn write_registration(path: &Path, token: &WorkerToken) -> Result<(), SupervisorError> {
    let register_err = |source| SupervisorError::Register {
        path: path.to_path_buf(),
        source,
    };
    let raw = serde_json::to_string(token).map_err(|e| register_err(std::io::Error::other(e)))?;
    fs::write(path, raw).map_err(register_err)
}
