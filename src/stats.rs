//! Counter names and monitoring snapshots.

use serde::Serialize;

use crate::worker::WorkerId;

pub(crate) const STAT_PROCESSED: &str = "processed";
pub(crate) const STAT_FAILED: &str = "failed";

pub(crate) fn per_worker(stat: &str, worker: &WorkerId) -> String {
    format!("{stat}:{worker}")
}

/// What one worker run accomplished, returned by [`crate::run`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkSummary {
    /// Jobs that completed successfully during this run.
    pub processed: u64,
    /// Jobs that failed (handler errors and faults) during this run.
    pub failed: u64,
}

/// A point-in-time snapshot of the whole installation.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    /// Lifetime successful jobs across all workers.
    pub processed: i64,
    /// Lifetime failed jobs across all workers.
    pub failed: i64,
    /// Length of the failed-job log.
    pub failed_log: usize,
    /// Registered worker identities.
    pub workers: Vec<String>,
    /// Every known queue with its current depth, sorted by name.
    pub queues: Vec<QueueDepth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDepth {
    pub name: String,
    pub size: usize,
}
