use crate::shared::*;
use std::time::Duration;
use testresult::TestResult;

use deadpool_redis::redis::AsyncCommands;

#[tokio::test]
async fn test_single_enqueue_single_execute() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let msg = random_string();

    let job_id = storage
        .enqueue_tracked(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?
        .unwrap();

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(storage.stat("processed").await?, 1);
    assert_eq!(storage.stat("failed").await?, 0);
    assert_eq!(storage.size(&queue).await?, 0);
    assert_eq!(storage.failed_count().await?, 0);
    assert!(performed().contains(&msg));

    let status = storage.job_status(&job_id).await?.unwrap();
    assert_eq!(status.status, rusque::StatusKind::Complete);
    assert_eq!(status.result, Some(serde_json::json!(msg)));

    Ok(())
}

#[tokio::test]
async fn test_handler_failure() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let job_id = storage
        .enqueue_tracked(&queue, "Boom", Some(serde_json::json!({})))
        .await?
        .unwrap();

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Boom>("Boom")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(storage.stat("processed").await?, 0);
    assert_eq!(storage.stat("failed").await?, 1);

    assert_eq!(storage.failed_count().await?, 1);
    let failures = storage.failed(0, 10).await?;
    assert_eq!(failures[0].error, "boom");
    assert_eq!(failures[0].exception, "HandlerError");
    assert_eq!(failures[0].queue, queue);
    assert_eq!(failures[0].payload["class"], "Boom");

    let status = storage.job_status(&job_id).await?.unwrap();
    assert_eq!(status.status, rusque::StatusKind::Failed);

    Ok(())
}

#[tokio::test]
async fn test_fifo_within_queue() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let first = format!("{}-1", random_string());
    let second = format!("{}-2", random_string());

    for msg in [&first, &second] {
        storage
            .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
            .await?;
    }

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .exit_when_processed(2);
    rusque::run(config).await?;

    let log = performed();
    let first_at = log.iter().position(|m| m == &first).unwrap();
    let second_at = log.iter().position(|m| m == &second).unwrap();
    assert!(first_at < second_at);

    Ok(())
}

#[tokio::test]
async fn test_blocking_multi_queue() -> TestResult {
    let storage = random_storage();
    let queue_a = random_string();
    let queue_b = random_string();
    let msg = random_string();

    storage
        .enqueue(&queue_b, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue_a)
        .watch_queue(&queue_b)
        .blocking(true)
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 1);
    assert!(performed().contains(&msg));
    assert_eq!(storage.size(&queue_a).await?, 0);
    assert_eq!(storage.size(&queue_b).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_empty_watch_set_sleeps_one_interval() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let msg = random_string();

    // Watch everything in a namespace with no queues yet: each empty
    // reservation must cost one interval, not two.
    let config = test_config(&storage)
        .interval(Duration::from_secs(2))
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let worker = tokio::spawn(rusque::run(config));

    for _ in 0..200 {
        if !storage.workers().await?.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!storage.workers().await?.is_empty());
    // Let the worker settle into its first empty-set sleep.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let enqueued_at = std::time::Instant::now();
    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?;

    let summary = worker.await??;
    let elapsed = enqueued_at.elapsed();

    assert_eq!(summary.processed, 1);
    assert!(performed().contains(&msg));
    assert!(
        elapsed < Duration::from_secs(3),
        "woke after {elapsed:?}, expected within one interval"
    );

    Ok(())
}

#[tokio::test]
async fn test_unknown_class_is_recorded() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage.enqueue(&queue, "Unregistered", None).await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.failed, 1);
    assert_eq!(storage.stat("failed").await?, 1);
    let failures = storage.failed(0, 10).await?;
    assert_eq!(failures[0].exception, "FactoryError");
    assert!(failures[0].error.contains("Unregistered"));

    Ok(())
}

#[tokio::test]
async fn test_setup_veto_skips_without_failure() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let msg = random_string();

    storage
        .enqueue(&queue, "Reluctant", Some(serde_json::json!({})))
        .await?;
    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Reluctant>("Reluctant")
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(storage.stat("processed").await?, 1);
    assert_eq!(storage.stat("failed").await?, 0);
    assert_eq!(storage.failed_count().await?, 0);
    assert!(!performed().contains(&"reluctant".to_string()));
    assert!(performed().contains(&msg));

    Ok(())
}

#[tokio::test]
async fn test_before_perform_veto() -> TestResult {
    let pool = setup();
    let mut events = rusque::EventBus::new();
    events.on(rusque::Event::BeforePerform, |payload| {
        if payload.class == "Boom" {
            rusque::Flow::Veto
        } else {
            rusque::Flow::Continue
        }
    });

    let storage = rusque::Storage::builder()
        .namespace(random_string())
        .build_from_pool(pool)?
        .with_event_bus(events);
    let queue = random_string();
    let msg = random_string();

    storage
        .enqueue(&queue, "Boom", Some(serde_json::json!({})))
        .await?;
    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Boom>("Boom")
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(storage.failed_count().await?, 0);
    assert!(performed().contains(&msg));

    Ok(())
}

#[tokio::test]
async fn test_undecodable_payload_is_dropped() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let msg = random_string();

    // A producer that never heard of the wire format.
    let pool = redis_pool();
    let mut redis = pool.get().await?;
    let _: () = redis
        .sadd(format!("{}:queues", storage.namespace()), &queue)
        .await?;
    let _: () = redis
        .rpush(
            format!("{}:queue:{}", storage.namespace(), queue),
            "{not json",
        )
        .await?;

    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": msg })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 1);
    assert_eq!(storage.stat("failed").await?, 1);
    let failures = storage.failed(0, 10).await?;
    assert_eq!(failures[0].exception, "SerializationError");
    assert_eq!(failures[0].payload, serde_json::json!("{not json"));
    assert!(performed().contains(&msg));

    Ok(())
}

#[tokio::test]
async fn test_prune_dead_sibling_at_startup() -> TestResult {
    let storage = random_storage();
    let queue = random_string();
    let namespace = storage.namespace().to_string();

    // Fabricate a sibling that died mid-job, exactly as it would have left
    // Redis: registered, with a processing pointer, and a PID nothing owns.
    let host = gethostname::gethostname().to_string_lossy().to_string();
    let dead_id = format!("{host}:5000000:{queue}");
    let payload = serde_json::json!({
        "class": "Echo",
        "args": [{ "msg": "orphan" }],
        "id": "deadbeef",
        "prefix": namespace,
        "queue_time": 1.0,
    });
    let pointer = serde_json::json!({
        "queue": queue,
        "run_at": chrono::Utc::now().to_rfc3339(),
        "payload": payload,
    });

    let pool = redis_pool();
    let mut redis = pool.get().await?;
    let _: () = redis.sadd(format!("{namespace}:workers"), &dead_id).await?;
    let _: () = redis
        .set(
            format!("{namespace}:worker:{dead_id}"),
            pointer.to_string(),
        )
        .await?;

    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": random_string() })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .exit_when_processed(1);
    rusque::run(config).await?;

    let workers = storage.workers().await?;
    assert!(!workers.iter().any(|w| w.to_string() == dead_id));

    let failures = storage.failed(0, 10).await?;
    let vanished: Vec<_> = failures
        .iter()
        .filter(|f| f.error.contains("vanished"))
        .collect();
    assert_eq!(vanished.len(), 1);
    assert_eq!(vanished[0].worker, dead_id);
    assert_eq!(vanished[0].payload["id"], serde_json::json!("deadbeef"));

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_dirty_exit_is_synthesized() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let job_id = storage
        .enqueue_tracked(&queue, "Echo", Some(serde_json::json!({ "msg": "x" })))
        .await?
        .unwrap();

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .isolation(rusque::Isolation::Child {
            program: "sh".into(),
            args: vec!["-c".to_string(), "exit 7".to_string()],
        })
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(storage.stat("failed").await?, 1);

    let failures = storage.failed(0, 10).await?;
    assert_eq!(failures[0].exception, "DirtyExit");
    assert_eq!(failures[0].error, "Job exited with exit code 7");

    let status = storage.job_status(&job_id).await?.unwrap();
    assert_eq!(status.status, rusque::StatusKind::Failed);

    // The worker survived the dirty child and cleaned up after itself.
    assert!(storage.workers().await?.is_empty());

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_killed_by_signal() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage
        .enqueue(&queue, "Echo", Some(serde_json::json!({ "msg": "x" })))
        .await?;

    let config = test_config(&storage)
        .watch_queue(&queue)
        .register::<Echo>("Echo")
        .isolation(rusque::Isolation::Child {
            program: "sh".into(),
            args: vec!["-c".to_string(), "kill -9 $$".to_string()],
        })
        .exit_when_processed(1);
    let summary = rusque::run(config).await?;

    assert_eq!(summary.failed, 1);
    let failures = storage.failed(0, 10).await?;
    assert_eq!(failures[0].error, "Job exited with signal 9");

    Ok(())
}
