use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Storage;
use crate::control::{ControlEvent, ControlHandle};
use crate::error::RusqueError;
use crate::job::Job;
use crate::registry::{JobFactory, JobRegistry};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Which queues a worker watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSelection {
    /// Every queue currently known, re-read on each reservation and walked in
    /// lexical order.
    All,
    /// A fixed list, walked in the given order.
    Listed(Vec<String>),
}

impl QueueSelection {
    /// The identity suffix: `*` or the comma-joined list.
    pub(crate) fn label(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Listed(queues) => queues.join(","),
        }
    }

    pub(crate) fn parse(value: &str) -> Self {
        if value.trim() == "*" {
            Self::All
        } else {
            Self::Listed(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
    }
}

/// How the supervisor isolates handler execution.
#[derive(Debug, Clone)]
pub enum Isolation {
    /// Execute inline in the worker process under a panic guard. The default,
    /// since child isolation needs the host binary's cooperation. Degraded
    /// isolation: a crashing or hanging handler takes the worker with it and
    /// cannot be killed.
    InProcess,
    /// Spawn a fresh child process per job and hand it the envelope on
    /// stdin. The program is expected to call [`crate::child::run`] — usually
    /// it is the worker binary itself behind an env-var check.
    Child {
        program: PathBuf,
        args: Vec<String>,
    },
}

impl Isolation {
    /// Child isolation re-running the current executable with the given
    /// arguments.
    pub fn current_exe(args: Vec<String>) -> Result<Self, RusqueError> {
        Ok(Self::Child {
            program: std::env::current_exe()?,
            args,
        })
    }
}

/// Everything a worker run needs, built with chained constructors:
///
/// ```rust,no_run
/// # use serde::Deserialize;
/// # #[derive(Deserialize)]
/// # struct Echo;
/// # #[async_trait::async_trait]
/// # impl rusque::Job for Echo {
/// #     async fn perform(&self) -> Result<serde_json::Value, rusque::JobError> {
/// #         Ok(serde_json::Value::Null)
/// #     }
/// # }
/// # fn example(storage: &rusque::Storage) {
/// let config = rusque::Config::new(storage)
///     .watch_queue("high")
///     .watch_queue("low")
///     .blocking(true)
///     .register::<Echo>("Echo");
/// # }
/// ```
pub struct Config {
    pub(crate) storage: Storage,
    pub(crate) registry: JobRegistry,
    pub(crate) queues: QueueSelection,
    pub(crate) interval: Duration,
    pub(crate) blocking: bool,
    pub(crate) isolation: Isolation,
    pub(crate) exit_when_processed: Option<u64>,
    pub(crate) handle_signals: bool,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) control: ControlHandle,
    pub(crate) control_rx: mpsc::UnboundedReceiver<ControlEvent>,
}

impl Config {
    pub fn new(storage: &Storage) -> Self {
        let (control, control_rx) = crate::control::channel();
        Self {
            storage: storage.clone(),
            registry: JobRegistry::new(),
            queues: QueueSelection::All,
            interval: DEFAULT_INTERVAL,
            blocking: false,
            isolation: Isolation::InProcess,
            exit_when_processed: None,
            handle_signals: true,
            cancel_token: CancellationToken::new(),
            control,
            control_rx,
        }
    }

    /// Appends a queue to the watch list (replacing watch-everything).
    pub fn watch_queue(mut self, queue: impl Into<String>) -> Self {
        match &mut self.queues {
            QueueSelection::Listed(queues) => queues.push(queue.into()),
            QueueSelection::All => self.queues = QueueSelection::Listed(vec![queue.into()]),
        }
        self
    }

    pub fn watch_all_queues(mut self) -> Self {
        self.queues = QueueSelection::All;
        self
    }

    /// Seconds slept between empty reservation attempts, and the `BLPOP`
    /// timeout in blocking mode. Default 5 seconds.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reserve with a blocking multi-queue pop instead of polling.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// How handler execution is isolated; defaults to [`Isolation::InProcess`].
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn register<T>(mut self, class: &str) -> Self
    where
        T: Job + serde::de::DeserializeOwned + 'static,
    {
        self.registry.register::<T>(class);
        self
    }

    pub fn register_with(mut self, class: &str, factory: JobFactory) -> Self {
        self.registry.register_with(class, factory);
        self
    }

    /// Stop after this many jobs have finished (counting failures). Useful in
    /// tests and burst deployments.
    pub fn exit_when_processed(mut self, processed: u64) -> Self {
        self.exit_when_processed = Some(processed);
        self
    }

    /// Skip installing OS signal handlers; the worker is then steered only
    /// through its [`ControlHandle`].
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// A handle for steering the worker programmatically.
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Overrides from the environment: `QUEUE` (comma list or `*`),
    /// `INTERVAL` (seconds), `BLOCKING` (truthy: `1`, `true`, `yes`).
    pub fn from_env(mut self) -> Result<Self, RusqueError> {
        if let Ok(queues) = std::env::var("QUEUE") {
            self.queues = QueueSelection::parse(&queues);
        }
        if let Ok(interval) = std::env::var("INTERVAL") {
            let secs: f64 = interval
                .parse()
                .map_err(|_| RusqueError::Config(format!("bad INTERVAL: {interval}")))?;
            self.interval = Duration::from_secs_f64(secs);
        }
        if let Ok(blocking) = std::env::var("BLOCKING") {
            self.blocking = matches!(
                blocking.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        Ok(self)
    }
}
