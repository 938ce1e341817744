use std::collections::HashMap;

use crate::envelope::JobEnvelope;

/// The named hooks fired around enqueue, perform, and failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BeforeEnqueue,
    AfterEnqueue,
    BeforeFirstFork,
    BeforeFork,
    AfterFork,
    BeforePerform,
    AfterPerform,
    OnFailure,
}

/// What a listener tells the dispatcher to do next.
///
/// `Veto` from `BeforeEnqueue` refuses the enqueue; from `BeforePerform` it
/// skips the job without failing it. On every other event the value is
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Veto,
}

/// What listeners get to look at.
#[derive(Debug, Clone, Copy)]
pub struct HookPayload<'a> {
    pub queue: &'a str,
    pub class: &'a str,
    pub args: &'a serde_json::Value,
    pub id: &'a str,
    /// Set only on [`Event::OnFailure`].
    pub error: Option<&'a str>,
}

static NO_ARGS: serde_json::Value = serde_json::Value::Null;

impl<'a> HookPayload<'a> {
    /// For hooks that fire outside the context of any job.
    pub(crate) fn empty() -> Self {
        Self {
            queue: "",
            class: "",
            args: &NO_ARGS,
            id: "",
            error: None,
        }
    }

    pub(crate) fn from_envelope(envelope: &'a JobEnvelope) -> Self {
        Self {
            queue: &envelope.queue,
            class: &envelope.class,
            args: envelope.arguments(),
            id: &envelope.id,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}

type Listener = Box<dyn Fn(&HookPayload<'_>) -> Flow + Send + Sync>;

/// Named-hook dispatcher. Listeners run in registration order and dispatch
/// short-circuits on the first `Veto`.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<Event, Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, event: Event, listener: F)
    where
        F: Fn(&HookPayload<'_>) -> Flow + Send + Sync + 'static,
    {
        self.listeners.entry(event).or_default().push(Box::new(listener));
    }

    pub fn trigger(&self, event: Event, payload: &HookPayload<'_>) -> Flow {
        for listener in self.listeners.get(&event).into_iter().flatten() {
            if listener(payload) == Flow::Veto {
                tracing::debug!(?event, job_id = payload.id, "Listener vetoed");
                return Flow::Veto;
            }
        }
        Flow::Continue
    }
}
