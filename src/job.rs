use std::panic::UnwindSafe;

use crate::events::Flow;

/// Errors handler code may raise; anything goes, it ends up stringified in the
/// failed log.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

pub type BoxedJob = Box<dyn Job>;

/// A unit of work resolved from an envelope's class name.
///
/// The factory deserializes the envelope's argument value into the
/// implementing type, so handler state is just struct fields. `perform` is
/// required; `set_up` and `tear_down` are optional bracketing. Returning
/// [`Flow::Veto`] from `set_up` skips the job without failing it.
#[async_trait::async_trait]
pub trait Job: Send + Sync + UnwindSafe {
    async fn set_up(&self) -> Result<Flow, JobError> {
        Ok(Flow::Continue)
    }

    /// The captured result lands in the job's terminal status record when the
    /// producer opted into tracking.
    async fn perform(&self) -> Result<serde_json::Value, JobError>;

    async fn tear_down(&self) -> Result<(), JobError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Job")
    }
}
