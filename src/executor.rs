//! Parent-side supervision of one reserved job.
//!
//! The supervisor owns the derived Redis state around an execution (processing
//! pointer, child PID, counters) and stays responsive to control events the
//! whole time. In child isolation it spawns the configured program, feeds it
//! the processing-pointer JSON on stdin, and classifies the exit status; jobs
//! whose child died without recording anything get a synthesized failure.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;

use crate::{
    config::Isolation,
    control::ControlEvent,
    envelope::{JobEnvelope, ProcessingInfo},
    error::RusqueError,
    events::{Event, Flow, HookPayload},
    failure::FailureRecord,
    launcher::Runtime,
    stats::{STAT_FAILED, STAT_PROCESSED, per_worker},
    status::StatusKind,
};

#[derive(Debug)]
enum Outcome {
    /// Clean exit; the supervisor counts it processed.
    Success,
    /// The executing process already recorded the failure.
    RecordedFailure,
    /// Vetoed by `before_perform` or `set_up`; no counters either way.
    Skipped,
    /// The child died before it could record; description goes into a
    /// synthesized failure record.
    Fault(String),
}

pub(crate) async fn supervise(rt: &mut Runtime, envelope: JobEnvelope) -> Result<(), RusqueError> {
    if rt
        .storage
        .events
        .trigger(Event::BeforePerform, &HookPayload::from_envelope(&envelope))
        == Flow::Veto
    {
        tracing::info!(
            job_id = envelope.id,
            class = envelope.class,
            "Job skipped by listener"
        );
        rt.storage.internal.clear_processing(&rt.id).await?;
        return Ok(());
    }

    let info = ProcessingInfo::new(&envelope);
    rt.storage.internal.set_processing(&rt.id, &info).await?;

    rt.storage
        .events
        .trigger(Event::BeforeFork, &HookPayload::from_envelope(&envelope));

    tracing::info!(
        job_id = envelope.id,
        queue = envelope.queue,
        class = envelope.class,
        "Job started"
    );
    let start = std::time::Instant::now();

    let outcome = match rt.isolation.clone() {
        Isolation::Child { program, args } => run_child(rt, &info, program, args).await?,
        Isolation::InProcess => run_in_process(rt, &envelope).await?,
    };

    tracing::info!(
        job_id = envelope.id,
        queue = envelope.queue,
        class = envelope.class,
        success = matches!(outcome, Outcome::Success),
        duration_ms = start.elapsed().as_millis(),
        "Job finished"
    );

    match outcome {
        Outcome::Success => {
            rt.storage.internal.stat_incr(STAT_PROCESSED).await?;
            rt.storage
                .internal
                .stat_incr(&per_worker(STAT_PROCESSED, &rt.id))
                .await?;
            rt.summary.processed += 1;
        }
        Outcome::RecordedFailure => {
            rt.summary.failed += 1;
        }
        Outcome::Skipped => {}
        Outcome::Fault(description) => {
            let worker_id = rt.id.to_string();
            let record =
                FailureRecord::from_fault(&envelope, "DirtyExit", description.as_str(), &worker_id);
            rt.storage.internal.push_failed(&record).await?;
            rt.storage
                .internal
                .update_status(
                    &envelope.id,
                    StatusKind::Failed,
                    Some(serde_json::Value::String(description.clone())),
                )
                .await?;
            rt.storage.internal.stat_incr(STAT_FAILED).await?;
            rt.storage
                .internal
                .stat_incr(&per_worker(STAT_FAILED, &rt.id))
                .await?;
            rt.storage.events.trigger(
                Event::OnFailure,
                &HookPayload::from_envelope(&envelope).with_error(&description),
            );
            rt.summary.failed += 1;
        }
    }

    rt.storage.internal.clear_processing(&rt.id).await?;
    Ok(())
}

async fn run_in_process(rt: &mut Runtime, envelope: &JobEnvelope) -> Result<Outcome, RusqueError> {
    rt.storage
        .internal
        .set_worker_pid(&rt.id, std::process::id())
        .await?;

    // Panics are caught inside; a fault here can only mean worker death,
    // which nobody is left to observe. That reduced isolation is the price
    // of in-process execution.
    let outcome = crate::child::execute(&rt.storage, &rt.registry, &rt.id, envelope).await?;

    Ok(match outcome {
        crate::child::PerformOutcome::Success => Outcome::Success,
        crate::child::PerformOutcome::Failed => Outcome::RecordedFailure,
        crate::child::PerformOutcome::Skipped => Outcome::Skipped,
    })
}

enum ChildWake {
    Exited(std::process::ExitStatus),
    Control(Option<ControlEvent>),
    Cancelled,
}

async fn run_child(
    rt: &mut Runtime,
    info: &ProcessingInfo,
    program: std::path::PathBuf,
    args: Vec<String>,
) -> Result<Outcome, RusqueError> {
    let mut child = tokio::process::Command::new(&program)
        .args(&args)
        .env(crate::child::WORKER_ID_ENV, rt.id.to_string())
        .stdin(Stdio::piped())
        .spawn()?;

    if let Some(pid) = child.id() {
        rt.storage.internal.set_worker_pid(&rt.id, pid).await?;
    }

    // An already-dead child shows up as a broken pipe here; the exit status
    // classification below covers it.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = serde_json::to_vec(info)?;
        if let Err(e) = stdin.write_all(&payload).await {
            tracing::warn!("Could not write envelope to child: {e}");
        }
    }

    loop {
        let wake = tokio::select! {
            status = child.wait() => ChildWake::Exited(status?),
            ev = rt.control_rx.recv() => ChildWake::Control(ev),
            _ = rt.cancel_token.cancelled() => ChildWake::Cancelled,
        };

        match wake {
            ChildWake::Exited(status) => return Ok(classify(status)),
            ChildWake::Cancelled => {
                tracing::info!("Killing child for immediate shutdown");
                return kill_and_reap(&mut child).await;
            }
            ChildWake::Control(Some(ev)) => {
                let kill_now = matches!(
                    ev,
                    ControlEvent::KillChild | ControlEvent::Shutdown { graceful: false }
                );
                rt.apply(ev);
                if kill_now {
                    tracing::info!("Killing child on operator request");
                    return kill_and_reap(&mut child).await;
                }
            }
            ChildWake::Control(None) => {}
        }
    }
}

async fn kill_and_reap(child: &mut tokio::process::Child) -> Result<Outcome, RusqueError> {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Could not kill child: {e}");
    }
    let status = child.wait().await?;
    Ok(classify(status))
}

fn classify(status: std::process::ExitStatus) -> Outcome {
    match status.code() {
        Some(crate::child::EXIT_SUCCESS) => Outcome::Success,
        Some(crate::child::EXIT_FAILED) => Outcome::RecordedFailure,
        Some(crate::child::EXIT_SKIPPED) => Outcome::Skipped,
        Some(code) => Outcome::Fault(format!("Job exited with exit code {code}")),
        None => Outcome::Fault(signal_description(&status)),
    }
}

#[cfg(unix)]
fn signal_description(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("Job exited with signal {signal}"),
        None => "Job exited abnormally".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_description(_status: &std::process::ExitStatus) -> String {
    "Job exited abnormally".to_string()
}
