/// Centralizes the Redis key naming scheme used by `StorageInternal`.
#[derive(Clone)]
pub(crate) struct StorageKeys {
    /// Namespace prefix applied to every Redis key (default `resque`, so
    /// existing producers of this wire format interoperate out of the box).
    pub(crate) namespace: String,
    /// Redis set of every queue name that has ever been enqueued to.
    pub(crate) queues: String,
    /// Prefix for the Redis lists holding JSON envelopes
    /// (actual keys look like `{queue_prefix}:<name>`).
    pub(crate) queue_prefix: String,
    /// Redis set of live worker identities.
    pub(crate) workers: String,
    /// Prefix for per-worker keys: `{worker_prefix}:<id>` is the processing
    /// pointer, with `:started` and `:pid` companions.
    pub(crate) worker_prefix: String,
    /// Prefix for counters (`{stat_prefix}:<name>`).
    pub(crate) stat_prefix: String,
    /// Redis list acting as the append-only failure log.
    pub(crate) failed: String,
}

impl StorageKeys {
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = if namespace.is_empty() {
            "resque".to_string()
        } else {
            namespace
        };

        Self {
            queues: format!("{namespace}:queues"),
            queue_prefix: format!("{namespace}:queue"),
            workers: format!("{namespace}:workers"),
            worker_prefix: format!("{namespace}:worker"),
            stat_prefix: format!("{namespace}:stat"),
            failed: format!("{namespace}:failed"),
            namespace,
        }
    }

    pub(crate) fn queue(&self, name: &str) -> String {
        format!("{}:{}", self.queue_prefix, name)
    }

    /// Recovers the bare queue name from a key as returned by `BLPOP`, which
    /// reports the full key the element was popped from.
    pub(crate) fn queue_name_from_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.queue_prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    pub(crate) fn worker(&self, id: &str) -> String {
        format!("{}:{}", self.worker_prefix, id)
    }

    pub(crate) fn worker_started(&self, id: &str) -> String {
        format!("{}:{}:started", self.worker_prefix, id)
    }

    pub(crate) fn worker_pid(&self, id: &str) -> String {
        format!("{}:{}:pid", self.worker_prefix, id)
    }

    pub(crate) fn stat(&self, name: &str) -> String {
        format!("{}:{}", self.stat_prefix, name)
    }

    pub(crate) fn job_status(&self, job_id: &str) -> String {
        format!("{}:job:{}:status", self.namespace, job_id)
    }
}
