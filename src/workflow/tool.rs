//! External tool invocation.
//!
//! Provides controlled execution of the workflow program with:
//! - Working directory set to the job directory
//! - Optional timeout (the child is killed when it expires)
//! - Output capture, keeping only the tail for logs

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::WorkflowError;

/// Arguments placed before the workflow directory by default.
pub const DEFAULT_TOOL_ARGS: &[&str] = &["-m", "mapclient.application", "-x", "--headless", "-w"];

/// Maximum captured output kept per stream (4KB).
const MAX_OUTPUT_TAIL: usize = 4 * 1024;

/// How to invoke the external tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Program to run (e.g. the Python interpreter of the workflow environment).
    pub program: PathBuf,
    /// Arguments preceding the workflow directory.
    pub args: Vec<OsString>,
    /// Kill the tool and fail the job after this long.
    pub timeout: Option<Duration>,
}

impl ToolConfig {
    /// `<program> -m mapclient.application -x --headless -w <workflow_dir>`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_TOOL_ARGS.iter().map(OsString::from).collect(),
            timeout: None,
        }
    }

    /// Replace the leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one tool run.
#[derive(Debug, Clone)]
pub struct ToolRun {
    /// Exit code; `None` when the tool was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Tail of stdout followed by tail of stderr.
    pub output: String,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run the tool against `workflow_dir` from within `job_dir`.
///
/// Output is drained while the tool runs; only the last
/// [`MAX_OUTPUT_TAIL`] bytes of each stream are kept.
pub async fn run_tool(
    config: &ToolConfig,
    workflow_dir: &Path,
    job_dir: &Path,
) -> Result<ToolRun, WorkflowError> {
    let program = config.program.display().to_string();

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .arg(workflow_dir)
        .current_dir(job_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| WorkflowError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    let stdout = child.stdout.take().map(|s| tokio::spawn(read_tail(s)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

    let status = match config.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(program = %program, "Failed to kill timed out tool: {e}");
                }
                for reader in [stdout, stderr].into_iter().flatten() {
                    reader.abort();
                }
                return Err(WorkflowError::Timeout { program, timeout });
            }
        },
        None => child.wait().await?,
    };

    let stdout = collect_tail(stdout).await;
    let stderr = collect_tail(stderr).await;
    let combined = if stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
    };

    Ok(ToolRun {
        exit_code: status.code(),
        output: combined,
    })
}

/// Drain `reader`, keeping at most [`MAX_OUTPUT_TAIL`] trailing bytes.
async fn read_tail<R>(mut reader: R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(MAX_OUTPUT_TAIL);
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend(&buf[..n]);
                let excess = tail.len().saturating_sub(MAX_OUTPUT_TAIL);
                tail.drain(..excess);
            }
        }
    }
    Vec::from(tail)
}

async fn collect_tail(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => decode(&handle.await.unwrap_or_default()),
        None => String::new(),
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
