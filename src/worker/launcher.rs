//! Spawning detached worker processes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::error::SupervisorError;

/// What a worker process needs to know to run the workflow loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    /// Program that runs the workflow (e.g. a Python interpreter).
    pub executable: PathBuf,
    /// Directory holding the workflow and its config files.
    pub workflow_dir: PathBuf,
    /// Shared working directory (registration file lives here).
    pub working_dir: PathBuf,
}

/// Starts a worker process and reports its pid.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, launch: &WorkerLaunch) -> Result<u32, SupervisorError>;

    /// Collect exit status of previously launched workers that have exited.
    fn reap(&self) {}
}

/// Launches a program detached from the caller: null stdio, own process group.
///
/// The launch parameters are appended as `--executable`, `--workflow-dir`
/// and `--working-dir` flags after the configured arguments.
#[derive(Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    children: Mutex<Vec<Child>>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Launcher that re-runs the current binary as `worker` on `queue_file`.
    pub fn current_exe(queue_file: &Path) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|e| SupervisorError::Spawn {
            program: "<current executable>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(program)
            .arg("worker")
            .arg("--queue-file")
            .arg(queue_file))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, launch: &WorkerLaunch) -> Result<u32, SupervisorError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--executable")
            .arg(&launch.executable)
            .arg("--workflow-dir")
            .arg(&launch.workflow_dir)
            .arg("--working-dir")
            .arg(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| SupervisorError::Spawn {
            program: self.program.display().to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        debug!(pid, program = %self.program.display(), "Worker process spawned");

        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
        Ok(pid)
    }

    fn reap(&self) {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = child.id(), %status, "Reaped worker process");
                false
            }
            Err(_) => false,
        });
    }
}
