use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status records expire after this many seconds.
pub(crate) const TERMINAL_TTL_SECS: i64 = 24 * 3600;

/// Lifecycle of a tracked job: `Waiting → Running → {Complete, Failed}`.
///
/// Jobs are only tracked when the producer opted in at enqueue time; updates
/// to untracked jobs are silent no-ops so opting out stays cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Waiting,
    Running,
    Failed,
    Complete,
}

impl StatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusKind::Complete | StatusKind::Failed)
    }
}

/// The record stored at `job:<id>:status`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobStatus {
    pub status: StatusKind,
    pub updated: DateTime<Utc>,
    pub started: DateTime<Utc>,
    /// Captured handler result; only present on terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl JobStatus {
    pub(crate) fn waiting() -> Self {
        let now = Utc::now();
        Self {
            status: StatusKind::Waiting,
            updated: now,
            started: now,
            result: None,
        }
    }

    pub(crate) fn advanced(&self, status: StatusKind, result: Option<serde_json::Value>) -> Self {
        Self {
            status,
            updated: Utc::now(),
            started: self.started,
            result: if status.is_terminal() { result } else { None },
        }
    }
}
