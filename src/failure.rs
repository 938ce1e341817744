use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::JobEnvelope;

/// One entry in the append-only `failed` list.
///
/// Two kinds of producers write these: handler code that returned an error
/// (recorded by whichever process ran the job), and lower-level faults —
/// panics, children that died before they could report, vanished workers —
/// where the supervisor synthesizes the record instead. Both land in the same
/// log; `exception` tells them apart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailureRecord {
    pub failed_at: DateTime<Utc>,
    /// The envelope as enqueued, or the raw string when it never decoded.
    pub payload: serde_json::Value,
    pub exception: String,
    pub error: String,
    pub backtrace: Vec<String>,
    pub worker: String,
    pub queue: String,
}

impl FailureRecord {
    /// A failure the executing process records itself: a handler error, a
    /// panic it caught, or a fault the supervisor observed from outside (a
    /// dirty child exit, a vanished worker).
    pub(crate) fn from_fault(
        envelope: &JobEnvelope,
        exception: &str,
        error: impl Into<String>,
        worker: &str,
    ) -> Self {
        Self {
            failed_at: Utc::now(),
            payload: serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null),
            exception: exception.to_string(),
            error: error.into(),
            backtrace: vec![],
            worker: worker.to_string(),
            queue: envelope.queue.clone(),
        }
    }

    /// A queue element that never decoded into an envelope; the payload is
    /// kept verbatim so the operator can inspect what the producer sent.
    pub(crate) fn from_undecodable(queue: &str, raw: &str, error: impl Into<String>, worker: &str) -> Self {
        Self {
            failed_at: Utc::now(),
            payload: serde_json::Value::String(raw.to_string()),
            exception: "SerializationError".to_string(),
            error: error.into(),
            backtrace: vec![],
            worker: worker.to_string(),
            queue: queue.to_string(),
        }
    }
}
