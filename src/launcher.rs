use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    Storage,
    config::{Config, Isolation, QueueSelection},
    control::{ControlEvent, ControlHandle},
    envelope::JobEnvelope,
    error::RusqueError,
    events::{Event, HookPayload},
    executor,
    failure::FailureRecord,
    registry::JobRegistry,
    stats::{STAT_FAILED, WorkSummary},
    worker::WorkerId,
};

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(30);

/// Runs a worker until shutdown: register, prune dead siblings, then
/// reserve → supervise → record, reacting to control events between (and
/// during) the blocking steps.
///
/// Returns what the run accomplished. Handler failures never end the run;
/// only shutdown requests, the configured processed limit, or an unusable
/// configuration do.
pub async fn run(config: Config) -> Result<WorkSummary, RusqueError> {
    let Config {
        storage,
        registry,
        queues,
        interval,
        blocking,
        isolation,
        exit_when_processed,
        handle_signals,
        cancel_token,
        control,
        control_rx,
    } = config;

    let signal_task = if handle_signals {
        Some(crate::control::install_signal_handlers(&control)?)
    } else {
        None
    };

    let mut rt = Runtime {
        id: WorkerId::current(queues.label()),
        storage,
        registry,
        queues,
        interval,
        blocking,
        isolation,
        control_rx,
        cancel_token,
        summary: WorkSummary::default(),
        paused: false,
        shutdown: None,
        _control: control,
    };

    tracing::info!(worker = %rt.id, "Worker starting");
    rt.storage.internal.register_worker(&rt.id).await?;

    let pruned = rt.storage.internal.prune_dead_workers(&rt.id).await?;
    if pruned > 0 {
        tracing::info!(pruned, "Pruned dead workers");
    }

    rt.storage
        .events
        .trigger(Event::BeforeFirstFork, &HookPayload::empty());

    let mut backoff = RETRY_BASE;

    loop {
        while let Ok(ev) = rt.control_rx.try_recv() {
            rt.apply(ev);
        }
        if rt.shutdown.is_some() {
            break;
        }
        if let Some(limit) = exit_when_processed
            && rt.summary.processed + rt.summary.failed >= limit
        {
            tracing::info!(limit, "Processed limit reached");
            break;
        }
        if rt.paused {
            rt.idle_wait().await;
            continue;
        }

        match rt.reserve().await {
            Ok(Some(envelope)) => {
                backoff = RETRY_BASE;
                if let Err(e) = executor::supervise(&mut rt, envelope).await {
                    tracing::error!("Could not record job outcome: {e}");
                    rt.backoff_wait(&mut backoff).await;
                }
            }
            // reserve() owns the interval sleep for empty results.
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Redis unavailable, backing off {backoff:?}: {e}");
                rt.backoff_wait(&mut backoff).await;
            }
        }
    }

    if let Err(e) = rt.storage.internal.unregister_worker(&rt.id).await {
        tracing::error!("Could not unregister worker: {e}");
    }
    if let Some(task) = signal_task {
        task.abort();
    }

    tracing::info!(
        worker = %rt.id,
        processed = rt.summary.processed,
        failed = rt.summary.failed,
        "Worker stopped"
    );

    Ok(rt.summary)
}

/// Mutable state of one worker run, shared with the execution supervisor.
pub(crate) struct Runtime {
    pub(crate) id: WorkerId,
    pub(crate) storage: Storage,
    pub(crate) registry: JobRegistry,
    pub(crate) isolation: Isolation,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) summary: WorkSummary,
    queues: QueueSelection,
    interval: Duration,
    blocking: bool,
    paused: bool,
    /// `Some(graceful)` once shutdown was requested.
    shutdown: Option<bool>,
    // Keeps the control channel open even when the caller dropped theirs.
    _control: ControlHandle,
}

enum ReserveWake {
    Popped(Result<Option<(String, String)>, RusqueError>),
    Control(Option<ControlEvent>),
    Cancelled,
}

impl Runtime {
    pub(crate) fn apply(&mut self, ev: ControlEvent) {
        match ev {
            ControlEvent::Shutdown { graceful } => {
                tracing::info!(graceful, "Shutdown requested");
                self.shutdown = Some(graceful);
                if !graceful {
                    self.cancel_token.cancel();
                }
            }
            ControlEvent::Pause => {
                tracing::info!("Pausing reservation");
                self.paused = true;
            }
            ControlEvent::Resume => {
                tracing::info!("Resuming reservation");
                self.paused = false;
            }
            ControlEvent::Reconnect => {
                tracing::info!("Dropping pooled Redis connections");
                self.storage.reconnect();
            }
            // Only meaningful while a child runs; the supervisor handles it.
            ControlEvent::KillChild => {}
        }
    }

    /// One reservation attempt. Owns the idle sleeping: an empty watch set or
    /// an empty poll sleeps one `interval` here (blocking mode waits inside
    /// `BLPOP` instead), so a `None` result never sleeps again in the caller.
    async fn reserve(&mut self) -> Result<Option<JobEnvelope>, RusqueError> {
        let queues = match &self.queues {
            QueueSelection::All => self.storage.queues().await?,
            QueueSelection::Listed(list) => list.clone(),
        };
        if queues.is_empty() {
            self.idle_wait().await;
            return Ok(None);
        }

        if self.blocking {
            let timeout = self.interval.as_secs_f64();
            let wake = tokio::select! {
                popped = self.storage.internal.blocking_pop_raw(&queues, timeout) => {
                    ReserveWake::Popped(popped)
                }
                ev = self.control_rx.recv() => ReserveWake::Control(ev),
                _ = self.cancel_token.cancelled() => ReserveWake::Cancelled,
            };
            match wake {
                ReserveWake::Popped(popped) => match popped? {
                    Some((queue, raw)) => self.decode_or_record(&queue, &raw).await,
                    None => Ok(None),
                },
                ReserveWake::Control(Some(ev)) => {
                    self.apply(ev);
                    Ok(None)
                }
                ReserveWake::Control(None) | ReserveWake::Cancelled => Ok(None),
            }
        } else {
            for queue in &queues {
                if let Some(raw) = self.storage.internal.pop_raw(queue).await? {
                    return self.decode_or_record(queue, &raw).await;
                }
            }
            self.idle_wait().await;
            Ok(None)
        }
    }

    /// A queue element that does not decode is dropped with a failure record
    /// carrying the raw payload; the loop moves on.
    async fn decode_or_record(
        &mut self,
        queue: &str,
        raw: &str,
    ) -> Result<Option<JobEnvelope>, RusqueError> {
        match JobEnvelope::decode(queue, raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::error!(queue, "Dropping undecodable payload: {e}");
                let record = FailureRecord::from_undecodable(
                    queue,
                    raw,
                    e.to_string(),
                    &self.id.to_string(),
                );
                self.storage.internal.push_failed(&record).await?;
                self.storage.internal.stat_incr(STAT_FAILED).await?;
                Ok(None)
            }
        }
    }

    async fn idle_wait(&mut self) {
        let wake = tokio::select! {
            _ = tokio::time::sleep(self.interval) => None,
            ev = self.control_rx.recv() => ev,
            _ = self.cancel_token.cancelled() => None,
        };
        if let Some(ev) = wake {
            self.apply(ev);
        }
    }

    async fn backoff_wait(&mut self, backoff: &mut Duration) {
        tokio::select! {
            _ = tokio::time::sleep(*backoff) => {}
            _ = self.cancel_token.cancelled() => {}
        }
        *backoff = (*backoff * 2).min(RETRY_MAX);
    }
}
