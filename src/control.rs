use tokio::sync::mpsc;

/// Operator commands the worker loop reacts to. On unix these are produced
/// from OS signals; everywhere (including tests) they can be injected through
/// a [`ControlHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop the worker. Immediate shutdown kills the running child first;
    /// graceful shutdown lets the current job finish.
    Shutdown { graceful: bool },
    /// Kill the running child, then keep reserving.
    KillChild,
    /// Stop reserving new jobs.
    Pause,
    /// Resume reserving.
    Resume,
    /// Drop pooled Redis connections.
    Reconnect,
}

/// Cloneable sender for steering a running worker.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl ControlHandle {
    /// Delivers an event; returns false once the worker is gone.
    pub fn send(&self, event: ControlEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

pub(crate) fn channel() -> (ControlHandle, mpsc::UnboundedReceiver<ControlEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, rx)
}

// SignalKind has no named constructor for SIGCONT.
#[cfg(target_os = "linux")]
const SIGCONT: std::ffi::c_int = 18;
#[cfg(all(unix, not(target_os = "linux")))]
const SIGCONT: std::ffi::c_int = 19;

/// Translates OS signals into control events for the lifetime of the worker:
/// TERM/INT shut down immediately, QUIT drains, USR1 kills the child, USR2
/// pauses, CONT resumes, PIPE reconnects.
#[cfg(unix)]
pub(crate) fn install_signal_handlers(
    handle: &ControlHandle,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut cont = signal(SignalKind::from_raw(SIGCONT))?;
    let mut pipe = signal(SignalKind::pipe())?;

    let handle = handle.clone();
    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = term.recv() => ControlEvent::Shutdown { graceful: false },
                _ = int.recv() => ControlEvent::Shutdown { graceful: false },
                _ = quit.recv() => ControlEvent::Shutdown { graceful: true },
                _ = usr1.recv() => ControlEvent::KillChild,
                _ = usr2.recv() => ControlEvent::Pause,
                _ = cont.recv() => ControlEvent::Resume,
                _ = pipe.recv() => ControlEvent::Reconnect,
            };
            tracing::info!(?event, "Received signal");
            if !handle.send(event) {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub(crate) fn install_signal_handlers(
    handle: &ControlHandle,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let handle = handle.clone();
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.send(ControlEvent::Shutdown { graceful: false });
        }
    }))
}
