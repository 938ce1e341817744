use std::fmt;
use std::str::FromStr;

use crate::error::RusqueError;

/// Identifies one worker process for its lifetime: `<host>:<pid>:<queues>`,
/// where `<queues>` is the comma-joined watch list in watch order, or `*` for
/// a worker watching every queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerId {
    pub hostname: String,
    pub pid: u32,
    pub queues_label: String,
}

impl WorkerId {
    pub(crate) fn current(queues_label: impl Into<String>) -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            pid: std::process::id(),
            queues_label: queues_label.into(),
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        self.hostname == gethostname::gethostname().to_string_lossy()
    }

    /// Whether an OS process with this identity's PID exists on this host.
    /// Only meaningful when [`is_local`](Self::is_local) holds.
    pub(crate) fn process_exists(&self) -> bool {
        process_exists(self.pid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hostname, self.pid, self.queues_label)
    }
}

impl FromStr for WorkerId {
    type Err = RusqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(hostname), Some(pid), Some(queues_label)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(RusqueError::MalformedWorkerId(s.to_string()));
        };
        let pid = pid
            .parse()
            .map_err(|_| RusqueError::MalformedWorkerId(s.to_string()))?;
        Ok(Self {
            hostname: hostname.to_string(),
            pid,
            queues_label: queues_label.to_string(),
        })
    }
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

// Without a liveness probe every sibling looks alive, so prune never fires.
#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    true
}
