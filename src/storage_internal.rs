use deadpool_redis::redis::AsyncCommands;
use uuid::Uuid;

use crate::{
    envelope::{JobEnvelope, ProcessingInfo},
    error::RusqueError,
    failure::FailureRecord,
    matcher::JobMatcher,
    status::{JobStatus, StatusKind, TERMINAL_TTL_SECS},
    worker::WorkerId,
};

/// The Redis gateway: key construction plus typed wrappers for the handful of
/// commands the crate uses (RPUSH, LPOP, BLPOP, LLEN, LRANGE, SADD, SREM,
/// SMEMBERS, SET, GET, DEL, EXPIRE, RPOPLPUSH, INCR, INCRBY, DECR).
#[derive(Clone)]
pub(crate) struct StorageInternal {
    pool: deadpool_redis::Pool,
    keys: crate::storage_keys::StorageKeys,
}

impl StorageInternal {
    pub fn new(pool: deadpool_redis::Pool, namespace: Option<String>) -> Self {
        Self {
            pool,
            keys: crate::storage_keys::StorageKeys::new(namespace.unwrap_or_default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.keys.namespace
    }

    pub async fn connection(&self) -> Result<deadpool_redis::Connection, RusqueError> {
        self.pool.get().await.map_err(RusqueError::RedisPool)
    }

    /// Drops idle pooled connections. This is the deliberate reset point used
    /// by the PIPE control event after the broker went away; connections
    /// checked out mid-command fail their next recycle check instead.
    pub fn reconnect(&self) {
        let _ = self.pool.retain(|_, _| false);
    }

    // --- queues -----------------------------------------------------------

    pub async fn push(&self, envelope: &JobEnvelope) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis.sadd(&self.keys.queues, &envelope.queue).await?;
        let _: () = redis
            .rpush(self.keys.queue(&envelope.queue), envelope.encode()?)
            .await?;
        Ok(())
    }

    pub async fn pop_raw(&self, queue: &str) -> Result<Option<String>, RusqueError> {
        let mut redis = self.connection().await?;
        let raw: Option<String> = redis.lpop(self.keys.queue(queue), None).await?;
        Ok(raw)
    }

    /// Multi-key blocking pop. Returns the bare queue name the element came
    /// from; BLPOP itself reports the full key, which gets stripped here.
    pub async fn blocking_pop_raw(
        &self,
        queues: &[String],
        timeout_secs: f64,
    ) -> Result<Option<(String, String)>, RusqueError> {
        let keys: Vec<String> = queues.iter().map(|q| self.keys.queue(q)).collect();
        let mut redis = self.connection().await?;
        let popped: Option<(String, String)> = redis.blpop(keys, timeout_secs).await?;
        Ok(popped.map(|(key, raw)| (self.keys.queue_name_from_key(&key).to_string(), raw)))
    }

    pub async fn queue_size(&self, queue: &str) -> Result<usize, RusqueError> {
        let mut redis = self.connection().await?;
        let len: i64 = redis.llen(self.keys.queue(queue)).await?;
        Ok(len as usize)
    }

    pub async fn queue_range(
        &self,
        queue: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, RusqueError> {
        let mut redis = self.connection().await?;
        let start = offset as isize;
        let stop = (offset + count).saturating_sub(1) as isize;
        let raw: Vec<String> = redis.lrange(self.keys.queue(queue), start, stop).await?;
        Ok(raw)
    }

    pub async fn queues(&self) -> Result<Vec<String>, RusqueError> {
        let mut redis = self.connection().await?;
        let names: Vec<String> = redis.smembers(&self.keys.queues).await?;
        Ok(names)
    }

    pub async fn remove_queue(&self, queue: &str) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis.srem(&self.keys.queues, queue).await?;
        let _: () = redis.del(self.keys.queue(queue)).await?;
        Ok(())
    }

    /// The temp-list shuffle: every element is moved off the source via
    /// RPOPLPUSH and either dropped (match) or parked on a requeue list,
    /// which then drains back so non-matching elements keep their relative
    /// order. A concurrent enqueue during the shuffle lands after the
    /// restored elements and is not examined; this is an operator tool, not
    /// a filter.
    pub async fn remove_jobs(
        &self,
        queue: &str,
        matchers: &[JobMatcher],
    ) -> Result<u64, RusqueError> {
        let source = self.keys.queue(queue);
        let nonce = Uuid::new_v4().simple().to_string();
        let temp = format!("{source}:removal:{nonce}");
        let requeue = format!("{source}:removal:{nonce}:requeue");

        let mut redis = self.connection().await?;
        let mut removed = 0;

        loop {
            let raw: Option<String> = redis.rpoplpush(&source, &temp).await?;
            let Some(raw) = raw else { break };

            let matched = JobEnvelope::decode(queue, &raw)
                .map(|envelope| matchers.iter().any(|m| m.matches(&envelope)))
                .unwrap_or(false);

            if matched {
                removed += 1;
                let _: Option<String> = redis.lpop(&temp, None).await?;
            } else {
                let _: Option<String> = redis.rpoplpush(&temp, &requeue).await?;
            }
        }

        loop {
            let raw: Option<String> = redis.rpoplpush(&requeue, &source).await?;
            if raw.is_none() {
                break;
            }
        }

        let _: () = redis.del(&temp).await?;
        let _: () = redis.del(&requeue).await?;

        Ok(removed)
    }

    // --- status -----------------------------------------------------------

    pub async fn create_status(&self, job_id: &str) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let record = serde_json::to_string(&JobStatus::waiting())?;
        let _: () = redis.set(self.keys.job_status(job_id), record).await?;
        Ok(())
    }

    pub async fn read_status(&self, job_id: &str) -> Result<Option<JobStatus>, RusqueError> {
        let mut redis = self.connection().await?;
        let raw: Option<String> = redis.get(self.keys.job_status(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Advances a tracked job's status. Untracked jobs (producer never opted
    /// in, or the record expired) are left alone so no record appears after
    /// opt-out. Terminal transitions attach the captured result and start the
    /// 24-hour expiry clock.
    pub async fn update_status(
        &self,
        job_id: &str,
        status: StatusKind,
        result: Option<serde_json::Value>,
    ) -> Result<(), RusqueError> {
        let Some(current) = self.read_status(job_id).await? else {
            return Ok(());
        };

        let key = self.keys.job_status(job_id);
        let record = serde_json::to_string(&current.advanced(status, result))?;
        let mut redis = self.connection().await?;
        let _: () = redis.set(&key, record).await?;
        if status.is_terminal() {
            let _: () = redis.expire(&key, TERMINAL_TTL_SECS).await?;
        }
        Ok(())
    }

    pub async fn is_tracking(&self, job_id: &str) -> Result<bool, RusqueError> {
        Ok(self.read_status(job_id).await?.is_some())
    }

    // --- failed log -------------------------------------------------------

    pub async fn push_failed(&self, record: &FailureRecord) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis
            .rpush(&self.keys.failed, serde_json::to_string(record)?)
            .await?;
        Ok(())
    }

    pub async fn failed_count(&self) -> Result<usize, RusqueError> {
        let mut redis = self.connection().await?;
        let len: i64 = redis.llen(&self.keys.failed).await?;
        Ok(len as usize)
    }

    pub async fn failed_range(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<FailureRecord>, RusqueError> {
        let mut redis = self.connection().await?;
        let start = offset as isize;
        let stop = (offset + count).saturating_sub(1) as isize;
        let raw: Vec<String> = redis.lrange(&self.keys.failed, start, stop).await?;
        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(RusqueError::Serde))
            .collect()
    }

    // --- stats ------------------------------------------------------------

    pub async fn stat_incr(&self, name: &str) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: i64 = redis.incr(self.keys.stat(name), 1).await?;
        Ok(())
    }

    pub async fn stat_incr_by(&self, name: &str, by: i64) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: i64 = redis.incr(self.keys.stat(name), by).await?;
        Ok(())
    }

    pub async fn stat_decr(&self, name: &str) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: i64 = redis.decr(self.keys.stat(name), 1).await?;
        Ok(())
    }

    pub async fn stat_get(&self, name: &str) -> Result<i64, RusqueError> {
        let mut redis = self.connection().await?;
        let value: Option<i64> = redis.get(self.keys.stat(name)).await?;
        Ok(value.unwrap_or(0))
    }

    pub async fn clear_stat(&self, name: &str) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis.del(self.keys.stat(name)).await?;
        Ok(())
    }

    // --- worker registry --------------------------------------------------

    pub async fn register_worker(&self, worker: &WorkerId) -> Result<(), RusqueError> {
        let id = worker.to_string();
        let mut redis = self.connection().await?;
        let _: () = redis.sadd(&self.keys.workers, &id).await?;
        let _: () = redis
            .set(self.keys.worker_started(&id), chrono::Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn unregister_worker(&self, worker: &WorkerId) -> Result<(), RusqueError> {
        let id = worker.to_string();
        let mut redis = self.connection().await?;
        let _: () = redis.srem(&self.keys.workers, &id).await?;
        let _: () = redis.del(self.keys.worker(&id)).await?;
        let _: () = redis.del(self.keys.worker_started(&id)).await?;
        let _: () = redis.del(self.keys.worker_pid(&id)).await?;
        let _: () = redis
            .del(self.keys.stat(&crate::stats::per_worker(crate::stats::STAT_PROCESSED, worker)))
            .await?;
        let _: () = redis
            .del(self.keys.stat(&crate::stats::per_worker(crate::stats::STAT_FAILED, worker)))
            .await?;
        Ok(())
    }

    pub async fn worker_ids(&self) -> Result<Vec<String>, RusqueError> {
        let mut redis = self.connection().await?;
        let ids: Vec<String> = redis.smembers(&self.keys.workers).await?;
        Ok(ids)
    }

    pub async fn worker_started(&self, worker: &WorkerId) -> Result<Option<String>, RusqueError> {
        let mut redis = self.connection().await?;
        let started: Option<String> = redis.get(self.keys.worker_started(&worker.to_string())).await?;
        Ok(started)
    }

    // --- processing pointer -----------------------------------------------

    pub async fn set_processing(
        &self,
        worker: &WorkerId,
        info: &ProcessingInfo,
    ) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis
            .set(self.keys.worker(&worker.to_string()), serde_json::to_string(info)?)
            .await?;
        Ok(())
    }

    pub async fn processing(&self, worker: &WorkerId) -> Result<Option<ProcessingInfo>, RusqueError> {
        self.processing_by_raw_id(&worker.to_string()).await
    }

    async fn processing_by_raw_id(&self, id: &str) -> Result<Option<ProcessingInfo>, RusqueError> {
        let mut redis = self.connection().await?;
        let raw: Option<String> = redis.get(self.keys.worker(id)).await?;
        match raw {
            Some(raw) => {
                let mut info: ProcessingInfo = serde_json::from_str(&raw)?;
                // The envelope's queue travels out of band on the wire.
                info.payload.queue = info.queue.clone();
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    pub async fn clear_processing(&self, worker: &WorkerId) -> Result<(), RusqueError> {
        let id = worker.to_string();
        let mut redis = self.connection().await?;
        let _: () = redis.del(self.keys.worker(&id)).await?;
        let _: () = redis.del(self.keys.worker_pid(&id)).await?;
        Ok(())
    }

    pub async fn set_worker_pid(&self, worker: &WorkerId, pid: u32) -> Result<(), RusqueError> {
        let mut redis = self.connection().await?;
        let _: () = redis
            .set(self.keys.worker_pid(&worker.to_string()), pid.to_string())
            .await?;
        Ok(())
    }

    pub async fn worker_pid(&self, worker: &WorkerId) -> Result<Option<u32>, RusqueError> {
        let mut redis = self.connection().await?;
        let raw: Option<String> = redis.get(self.keys.worker_pid(&worker.to_string())).await?;
        Ok(raw.and_then(|p| p.parse().ok()))
    }

    // --- prune ------------------------------------------------------------

    /// Removes registry entries for workers on this host whose OS process no
    /// longer exists. An orphaned processing pointer becomes a failure record
    /// before the entry goes away, so the job is at least accounted for.
    pub async fn prune_dead_workers(&self, this: &WorkerId) -> Result<usize, RusqueError> {
        let mut pruned = 0;

        for raw_id in self.worker_ids().await? {
            let Ok(dead) = raw_id.parse::<WorkerId>() else {
                tracing::warn!(worker = raw_id, "Unparseable registry entry, skipping");
                continue;
            };

            if !dead.is_local() || dead.pid == this.pid || dead.process_exists() {
                continue;
            }

            tracing::info!(worker = raw_id, "Pruning dead worker");

            if let Some(orphan) = self.processing_by_raw_id(&raw_id).await? {
                let record = FailureRecord::from_fault(
                    &orphan.payload,
                    "DirtyExit",
                    format!("Worker {raw_id} vanished while processing this job"),
                    &raw_id,
                );
                self.push_failed(&record).await?;
            }

            self.unregister_worker(&dead).await?;
            pruned += 1;
        }

        Ok(pruned)
    }
}
