use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RusqueError;

pub type JobId = String;

/// The job description serialized into a queue list.
///
/// The wire shape is `{class, args, id, prefix, queue_time}`. `args` is always
/// a one-element array whose sole element is the argument value (or null);
/// that single wrapping is part of the wire contract with producers in other
/// languages and must survive round-trips untouched. The queue name travels
/// out of band: it is implied by the list the envelope sits in.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JobEnvelope {
    #[serde(skip)]
    pub queue: String,
    pub class: String,
    pub args: Vec<serde_json::Value>,
    pub id: JobId,
    #[serde(default)]
    pub prefix: String,
    /// Enqueue timestamp, float seconds since the Unix epoch.
    pub queue_time: f64,
}

impl JobEnvelope {
    pub(crate) fn new(
        queue: impl Into<String>,
        class: impl Into<String>,
        args: Option<serde_json::Value>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            class: class.into(),
            args: vec![args.unwrap_or(serde_json::Value::Null)],
            id: Uuid::new_v4().simple().to_string(),
            prefix: prefix.into(),
            queue_time: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// The argument value inside the single-element wrapping.
    pub fn arguments(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        self.args.first().unwrap_or(&NULL)
    }

    pub(crate) fn encode(&self) -> Result<String, RusqueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn decode(queue: &str, raw: &str) -> Result<Self, RusqueError> {
        let mut envelope: Self = serde_json::from_str(raw)?;
        envelope.queue = queue.to_string();
        Ok(envelope)
    }
}

/// What a worker is executing right now; stored at `worker:<id>` while a job
/// is reserved and cleared once its outcome is recorded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingInfo {
    pub queue: String,
    pub run_at: DateTime<Utc>,
    pub payload: JobEnvelope,
}

impl ProcessingInfo {
    pub(crate) fn new(envelope: &JobEnvelope) -> Self {
        Self {
            queue: envelope.queue.clone(),
            run_at: Utc::now(),
            payload: envelope.clone(),
        }
    }
}
