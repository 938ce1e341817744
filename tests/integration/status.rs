use crate::shared::*;
use testresult::TestResult;

async fn status_ttl(storage: &rusque::Storage, job_id: &str) -> i64 {
    let pool = redis_pool();
    let mut redis = pool.get().await.unwrap();
    deadpool_redis::redis::cmd("TTL")
        .arg(format!("{}:job:{}:status", storage.namespace(), job_id))
        .query_async(&mut redis)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_waiting_status_has_no_expiry() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let job_id = storage
        .enqueue_tracked(&queue, "Echo", Some(serde_json::json!({ "msg": "x" })))
        .await?
        .unwrap();

    let status = storage.job_status(&job_id).await?.unwrap();
    assert_eq!(status.status, rusque::StatusKind::Waiting);
    assert_eq!(status_ttl(&storage, &job_id).await, -1);

    Ok(())
}

#[tokio::test]
async fn test_terminal_status_expires() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let completed = storage
        .enqueue_tracked(&queue, "Echo", Some(serde_json::json!({ "msg": random_string() })))
        .await?
        .unwrap();
    let failed = storage
        .enqueue_tracked(&queue, "Boom", Some(serde_json::json!({})))
        .await?
        .unwrap();

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .register::<Boom>("Boom")
        .exit_when_processed(2);
    rusque::run(config).await?;

    for job_id in [&completed, &failed] {
        let ttl = status_ttl(&storage, job_id).await;
        assert!(ttl > 0 && ttl <= 24 * 3600, "unexpected TTL {ttl}");
    }

    let status = storage.job_status(&failed).await?.unwrap();
    assert_eq!(status.status, rusque::StatusKind::Failed);
    assert_eq!(status.result, Some(serde_json::json!("boom")));

    Ok(())
}

#[tokio::test]
async fn test_untracked_job_leaves_no_record() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let job_id = storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": random_string() })))
        .await?
        .unwrap();

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    rusque::run(config).await?;

    assert!(storage.job_status(&job_id).await?.is_none());
    assert!(!storage.is_tracking(&job_id).await?);

    Ok(())
}

#[tokio::test]
async fn test_stats_snapshot() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": random_string() })))
        .await?;
    storage
        .enqueue(&queue, "Boom", Some(serde_json::json!({})))
        .await?;

    let stats = storage.stats().await?;
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.queues.len(), 1);
    assert_eq!(stats.queues[0].name, queue);
    assert_eq!(stats.queues[0].size, 2);

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .register::<Boom>("Boom")
        .exit_when_processed(2);
    rusque::run(config).await?;

    let stats = storage.stats().await?;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failed_log, 1);
    assert_eq!(stats.queues[0].size, 0);
    assert!(stats.workers.is_empty());

    Ok(())
}
