use std::sync::Arc;

use crate::{
    envelope::{JobEnvelope, JobId, ProcessingInfo},
    error::RusqueError,
    events::{Event, EventBus, Flow, HookPayload},
    failure::FailureRecord,
    matcher::JobMatcher,
    stats::{GlobalStats, QueueDepth, STAT_FAILED, STAT_PROCESSED},
    status::JobStatus,
    storage_builder::StorageBuilder,
    storage_internal::StorageInternal,
    worker::WorkerId,
};

/// Storage is the producer-side and operator-side interface: enqueueing,
/// queue maintenance, the failed log, per-job status, and counters.
///
/// Instances are cheap to clone and share one connection pool.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn example() -> Result<(), rusque::RusqueError> {
/// let storage = rusque::Storage::builder().from_env()?.build()?;
///
/// let id = storage
///     .enqueue("default", "Echo", Some(serde_json::json!({ "msg": "hi" })))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Storage {
    pub(crate) internal: StorageInternal,
    pub(crate) events: Arc<EventBus>,
}

impl Storage {
    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_internal(internal: StorageInternal) -> Self {
        Self {
            internal,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Installs the event bus whose hooks fire around enqueue, perform, and
    /// failure. Listeners registered after this call via a retained clone of
    /// the bus are not seen; build the bus first, then hand it over.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Enqueues a job without status tracking.
    ///
    /// Returns `None` when a `before_enqueue` listener vetoed the enqueue, in
    /// which case nothing was written.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<Option<JobId>, RusqueError> {
        self.enqueue_with(queue, class, args, false).await
    }

    /// Enqueues a job and creates its status record, so the job's lifecycle
    /// can be observed via [`job_status`](Self::job_status).
    pub async fn enqueue_tracked(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
    ) -> Result<Option<JobId>, RusqueError> {
        self.enqueue_with(queue, class, args, true).await
    }

    async fn enqueue_with(
        &self,
        queue: &str,
        class: &str,
        args: Option<serde_json::Value>,
        track: bool,
    ) -> Result<Option<JobId>, RusqueError> {
        let envelope = JobEnvelope::new(queue, class, args, self.internal.namespace());
        let payload = HookPayload::from_envelope(&envelope);

        if self.events.trigger(Event::BeforeEnqueue, &payload) == Flow::Veto {
            tracing::debug!(queue, class, "Enqueue refused by listener");
            return Ok(None);
        }

        tracing::trace!(queue, class, job_id = envelope.id, "Enqueuing job");

        self.internal.push(&envelope).await?;
        if track {
            self.internal.create_status(&envelope.id).await?;
        }

        self.events.trigger(Event::AfterEnqueue, &payload);

        Ok(Some(envelope.id))
    }

    /// Re-enqueues the same class and arguments on the same queue under a
    /// fresh id, keeping status tracking if the source job was tracked.
    pub async fn recreate(&self, envelope: &JobEnvelope) -> Result<Option<JobId>, RusqueError> {
        let track = self.internal.is_tracking(&envelope.id).await?;
        self.enqueue_with(
            &envelope.queue,
            &envelope.class,
            Some(envelope.arguments().clone()),
            track,
        )
        .await
    }

    /// Pops the head of a queue, if any.
    pub async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, RusqueError> {
        match self.internal.pop_raw(queue).await? {
            Some(raw) => Ok(Some(JobEnvelope::decode(queue, &raw)?)),
            None => Ok(None),
        }
    }

    pub async fn size(&self, queue: &str) -> Result<usize, RusqueError> {
        self.internal.queue_size(queue).await
    }

    /// All known queue names, sorted.
    pub async fn queues(&self) -> Result<Vec<String>, RusqueError> {
        let mut queues = self.internal.queues().await?;
        queues.sort();
        Ok(queues)
    }

    /// Lists enqueued envelopes without consuming them.
    pub async fn peek(
        &self,
        queue: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<JobEnvelope>, RusqueError> {
        self.internal
            .queue_range(queue, offset, count)
            .await?
            .iter()
            .map(|raw| JobEnvelope::decode(queue, raw))
            .collect()
    }

    /// Deletes a queue and its pending jobs.
    pub async fn remove_queue(&self, queue: &str) -> Result<(), RusqueError> {
        self.internal.remove_queue(queue).await
    }

    /// Removes every pending job matching any of the given matchers and
    /// returns how many were dropped. Non-matching jobs keep their order.
    /// Best-effort under concurrent enqueues.
    pub async fn remove_jobs(
        &self,
        queue: &str,
        matchers: &[JobMatcher],
    ) -> Result<u64, RusqueError> {
        self.internal.remove_jobs(queue, matchers).await
    }

    /// Status of a tracked job; `None` for jobs that were never tracked or
    /// whose terminal record already expired.
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>, RusqueError> {
        self.internal.read_status(job_id).await
    }

    pub async fn is_tracking(&self, job_id: &str) -> Result<bool, RusqueError> {
        self.internal.is_tracking(job_id).await
    }

    pub async fn failed_count(&self) -> Result<usize, RusqueError> {
        self.internal.failed_count().await
    }

    /// A slice of the failed-job log, oldest first.
    pub async fn failed(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<FailureRecord>, RusqueError> {
        self.internal.failed_range(offset, count).await
    }

    /// Current value of a counter (`processed`, `failed`, or a per-worker
    /// variant). Missing counters read as zero.
    pub async fn stat(&self, name: &str) -> Result<i64, RusqueError> {
        self.internal.stat_get(name).await
    }

    /// Adds to a counter. Producers use this for their own derived counters;
    /// the worker's counters only ever grow by one.
    pub async fn incr_stat(&self, name: &str, by: i64) -> Result<(), RusqueError> {
        self.internal.stat_incr_by(name, by).await
    }

    pub async fn decr_stat(&self, name: &str) -> Result<(), RusqueError> {
        self.internal.stat_decr(name).await
    }

    /// Deletes a counter. Operator tool; the worker never resets counters.
    pub async fn clear_stat(&self, name: &str) -> Result<(), RusqueError> {
        self.internal.clear_stat(name).await
    }

    /// Registered worker identities. Unparseable registry entries are skipped.
    pub async fn workers(&self) -> Result<Vec<WorkerId>, RusqueError> {
        Ok(self
            .internal
            .worker_ids()
            .await?
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    /// What a worker is executing right now, if anything.
    pub async fn working(&self, worker: &WorkerId) -> Result<Option<ProcessingInfo>, RusqueError> {
        self.internal.processing(worker).await
    }

    pub async fn worker_started(&self, worker: &WorkerId) -> Result<Option<String>, RusqueError> {
        self.internal.worker_started(worker).await
    }

    /// PID of the process executing the worker's current job, if any.
    pub async fn worker_pid(&self, worker: &WorkerId) -> Result<Option<u32>, RusqueError> {
        self.internal.worker_pid(worker).await
    }

    /// A point-in-time snapshot of counters, queues, and workers.
    pub async fn stats(&self) -> Result<GlobalStats, RusqueError> {
        let mut queues = Vec::new();
        for name in self.queues().await? {
            let size = self.internal.queue_size(&name).await?;
            queues.push(QueueDepth { name, size });
        }

        Ok(GlobalStats {
            processed: self.internal.stat_get(STAT_PROCESSED).await?,
            failed: self.internal.stat_get(STAT_FAILED).await?,
            failed_log: self.internal.failed_count().await?,
            workers: self.internal.worker_ids().await?,
            queues,
        })
    }

    pub fn namespace(&self) -> &str {
        self.internal.namespace()
    }

    /// Drops pooled Redis connections; the next operation reconnects.
    pub fn reconnect(&self) {
        self.internal.reconnect();
    }
}
