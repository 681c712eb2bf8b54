//! Process identity and liveness.
//!
//! A bare pid only says that *some* process holds that number. The worker
//! token also records the kernel start time of the process, so a pid that
//! was recycled for an unrelated process is not mistaken for the worker.

use serde::{Deserialize, Serialize};

/// Identity of a spawned worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerToken {
    pub pid: u32,
    /// Kernel start time (clock ticks since boot); `None` where unavailable.
    #[serde(default)]
    pub started_at: Option<u64>,
}

impl WorkerToken {
    /// Record the identity of a running process.
    pub fn capture(pid: u32) -> Self {
        Self {
            pid,
            started_at: read_proc_start_time(pid),
        }
    }

    /// Parse a registration record.
    ///
    /// Accepts the JSON token or a legacy bare pid. Negative or garbled
    /// content means no worker is registered.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(token) = serde_json::from_str::<WorkerToken>(raw) {
            return Some(token);
        }
        let pid = raw.parse::<i64>().ok()?;
        Some(Self {
            pid: u32::try_from(pid).ok()?,
            started_at: None,
        })
    }

    /// Whether the process this token describes is still running.
    pub fn is_alive(&self) -> bool {
        if !is_pid_alive(self.pid) || is_zombie(self.pid) {
            return false;
        }
        match self.started_at {
            // Unreadable stat for a pid that kill(0) accepts: assume it is ours.
            Some(expected) => read_proc_start_time(self.pid).is_none_or(|now| now == expected),
            None => true,
        }
    }
}

/// Check whether a process with this pid exists.
///
/// Uses `kill(pid, 0)`, which checks for existence without sending a signal.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs only the existence and permission check.
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid_i32;
        true
    }
}

/// Fields of `/proc/<pid>/stat` after the `comm` field.
#[cfg(target_os = "linux")]
fn proc_stat_fields(pid: u32) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm is parenthesised and may itself contain spaces or parens.
    let after_comm = contents.rsplit_once(')')?.1;
    Some(after_comm.split_whitespace().map(str::to_string).collect())
}

/// Whether the pid is an exited process that has not been reaped yet.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    proc_stat_fields(pid)
        .and_then(|fields| fields.first().cloned())
        .is_some_and(|state| state == "Z" || state == "X")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Kernel start time of `pid` (field 22 of `/proc/<pid>/stat`).
#[cfg(target_os = "linux")]
pub fn read_proc_start_time(pid: u32) -> Option<u64> {
    // Field 3 (state) is index 0 after comm, so field 22 is index 19.
    proc_stat_fields(pid)?.get(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
pub fn read_proc_start_time(_pid: u32) -> Option<u64> {
    None
}
