//! The sequence a job goes through once reserved, and the entry point for
//! child processes in child isolation.
//!
//! Both isolation modes funnel through [`execute`]: the child process calls it
//! after decoding the envelope from stdin, the in-process supervisor calls it
//! inline. Either way the executing process records handler outcomes itself;
//! only faults it cannot observe (its own death) are left to the supervisor.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;

use tokio::io::AsyncReadExt;

use crate::{
    Storage,
    envelope::{JobEnvelope, ProcessingInfo},
    error::RusqueError,
    events::{Event, Flow, HookPayload},
    failure::FailureRecord,
    job::BoxedJob,
    registry::JobRegistry,
    stats::{STAT_FAILED, per_worker},
    status::StatusKind,
    worker::WorkerId,
};

/// Exit codes the supervisor interprets. Anything else means the child died
/// before it could record an outcome, and the supervisor synthesizes one.
pub(crate) const EXIT_SUCCESS: i32 = 0;
pub(crate) const EXIT_FAILED: i32 = 1;
pub(crate) const EXIT_SKIPPED: i32 = 3;

/// Environment variable carrying the supervising worker's identity into the
/// child.
pub const WORKER_ID_ENV: &str = "RUSQUE_WORKER_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PerformOutcome {
    /// Handler succeeded; status and hooks are recorded, counters are the
    /// supervisor's job.
    Success,
    /// Handler failed and the failure is fully recorded (log, status,
    /// counters, hooks).
    Failed,
    /// A `set_up` veto; nothing recorded.
    Skipped,
}

/// Child-process entry point. Reads the processing-pointer JSON from stdin,
/// performs the job, and exits with a code the supervisor understands.
///
/// Host binaries using [`crate::Isolation::Child`] are expected to branch
/// into this before starting a worker, e.g. behind a flag or env var:
///
/// ```rust,no_run
/// # async fn example(storage: rusque::Storage, registry: rusque::JobRegistry) -> std::process::ExitCode {
/// if std::env::var_os("RUSQUE_CHILD").is_some() {
///     return rusque::child::run(&storage, &registry).await;
/// }
/// # std::process::ExitCode::SUCCESS
/// # }
/// ```
pub async fn run(storage: &Storage, registry: &JobRegistry) -> ExitCode {
    match run_inner(storage, registry).await {
        Ok(PerformOutcome::Success) => ExitCode::from(EXIT_SUCCESS as u8),
        Ok(PerformOutcome::Failed) => ExitCode::from(EXIT_FAILED as u8),
        Ok(PerformOutcome::Skipped) => ExitCode::from(EXIT_SKIPPED as u8),
        Err(e) => {
            tracing::error!("Child could not record its outcome: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run_inner(
    storage: &Storage,
    registry: &JobRegistry,
) -> Result<PerformOutcome, RusqueError> {
    let worker = match std::env::var(WORKER_ID_ENV) {
        Ok(id) => id.parse()?,
        Err(_) => WorkerId::current("*"),
    };

    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let info: ProcessingInfo = serde_json::from_str(&raw)?;

    // The envelope's queue travels out of band on the wire.
    let mut envelope = info.payload;
    envelope.queue = info.queue;

    execute(storage, registry, &worker, &envelope).await
}

/// Runs one reserved job to completion in the current process: `after_fork`
/// hook, status RUNNING, `set_up` / `perform` / `tear_down`, then outcome
/// recording. Panics in handler code are caught and recorded as failures.
pub(crate) async fn execute(
    storage: &Storage,
    registry: &JobRegistry,
    worker: &WorkerId,
    envelope: &JobEnvelope,
) -> Result<PerformOutcome, RusqueError> {
    storage
        .events
        .trigger(Event::AfterFork, &HookPayload::from_envelope(envelope));

    let handled = AssertUnwindSafe(run_handler(storage, registry, envelope))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(HandlerFailure {
                exception: "Panic",
                message,
                backtrace: vec![],
            })
        });

    match handled {
        Ok(Handled::Done(result)) => {
            storage
                .internal
                .update_status(&envelope.id, StatusKind::Complete, Some(result))
                .await?;
            storage
                .events
                .trigger(Event::AfterPerform, &HookPayload::from_envelope(envelope));
            Ok(PerformOutcome::Success)
        }
        Ok(Handled::Skipped) => Ok(PerformOutcome::Skipped),
        Err(failure) => {
            record_failure(storage, worker, envelope, &failure).await?;
            Ok(PerformOutcome::Failed)
        }
    }
}

enum Handled {
    Done(serde_json::Value),
    Skipped,
}

struct HandlerFailure {
    exception: &'static str,
    message: String,
    backtrace: Vec<String>,
}

async fn run_handler(
    storage: &Storage,
    registry: &JobRegistry,
    envelope: &JobEnvelope,
) -> Result<Handled, HandlerFailure> {
    let job: BoxedJob = registry
        .build(&envelope.class, envelope.arguments().clone())
        .map_err(|e| HandlerFailure {
            exception: "FactoryError",
            message: e.to_string(),
            backtrace: vec![],
        })?;

    if job.set_up().await.map_err(handler_failure)? == Flow::Veto {
        tracing::info!(
            job_id = envelope.id,
            class = envelope.class,
            "Job skipped by set_up"
        );
        return Ok(Handled::Skipped);
    }

    // Status updates no-op for untracked jobs.
    if let Err(e) = storage
        .internal
        .update_status(&envelope.id, StatusKind::Running, None)
        .await
    {
        tracing::warn!(job_id = envelope.id, "Could not mark job running: {e}");
    }

    let result = job.perform().await.map_err(handler_failure)?;
    job.tear_down().await.map_err(handler_failure)?;

    Ok(Handled::Done(result))
}

fn handler_failure(error: crate::job::JobError) -> HandlerFailure {
    let mut backtrace = vec![];
    let mut source = error.source();
    while let Some(cause) = source {
        backtrace.push(cause.to_string());
        source = cause.source();
    }
    HandlerFailure {
        exception: "HandlerError",
        message: error.to_string(),
        backtrace,
    }
}

async fn record_failure(
    storage: &Storage,
    worker: &WorkerId,
    envelope: &JobEnvelope,
    failure: &HandlerFailure,
) -> Result<(), RusqueError> {
    tracing::error!(
        job_id = envelope.id,
        queue = envelope.queue,
        class = envelope.class,
        exception = failure.exception,
        "Job failed: {}",
        failure.message
    );

    let worker_id = worker.to_string();
    let mut record = FailureRecord::from_fault(
        envelope,
        failure.exception,
        failure.message.clone(),
        &worker_id,
    );
    record.backtrace = failure.backtrace.clone();

    storage
        .internal
        .update_status(
            &envelope.id,
            StatusKind::Failed,
            Some(serde_json::Value::String(failure.message.clone())),
        )
        .await?;
    storage.internal.push_failed(&record).await?;
    storage.internal.stat_incr(STAT_FAILED).await?;
    storage
        .internal
        .stat_incr(&per_worker(STAT_FAILED, worker))
        .await?;

    storage.events.trigger(
        Event::OnFailure,
        &HookPayload::from_envelope(envelope).with_error(&failure.message),
    );

    Ok(())
}
