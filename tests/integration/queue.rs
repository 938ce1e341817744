use crate::shared::*;
use testresult::TestResult;

#[tokio::test]
async fn test_enqueue_pop_fifo() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let first = storage
        .enqueue(&queue, "A", Some(serde_json::json!({ "n": 1 })))
        .await?
        .unwrap();
    let second = storage
        .enqueue(&queue, "B", Some(serde_json::json!({ "n": 2 })))
        .await?
        .unwrap();
    assert_ne!(first, second);

    assert_eq!(storage.size(&queue).await?, 2);
    assert_eq!(storage.queues().await?, vec![queue.clone()]);

    let popped = storage.pop(&queue).await?.unwrap();
    assert_eq!(popped.id, first);
    assert_eq!(popped.class, "A");
    assert_eq!(popped.queue, queue);
    assert_eq!(popped.arguments(), &serde_json::json!({ "n": 1 }));

    let popped = storage.pop(&queue).await?.unwrap();
    assert_eq!(popped.id, second);

    assert!(storage.pop(&queue).await?.is_none());
    assert_eq!(storage.size(&queue).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_peek_does_not_consume() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage.enqueue(&queue, "A", None).await?;
    storage.enqueue(&queue, "B", None).await?;

    let peeked = storage.peek(&queue, 0, 10).await?;
    assert_eq!(peeked.len(), 2);
    assert_eq!(peeked[0].class, "A");
    assert_eq!(storage.size(&queue).await?, 2);

    let peeked = storage.peek(&queue, 1, 10).await?;
    assert_eq!(peeked.len(), 1);
    assert_eq!(peeked[0].class, "B");

    Ok(())
}

#[tokio::test]
async fn test_remove_queue() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage.enqueue(&queue, "A", None).await?;
    assert_eq!(storage.queues().await?.len(), 1);

    storage.remove_queue(&queue).await?;
    assert!(storage.queues().await?.is_empty());
    assert_eq!(storage.size(&queue).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_remove_jobs_by_class() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    for class in ["A", "B", "A", "C"] {
        storage.enqueue(&queue, class, None).await?;
    }

    let removed = storage
        .remove_jobs(&queue, &[rusque::JobMatcher::class("A")])
        .await?;
    assert_eq!(removed, 2);

    let remaining: Vec<String> = storage
        .peek(&queue, 0, 10)
        .await?
        .into_iter()
        .map(|e| e.class)
        .collect();
    assert_eq!(remaining, vec!["B", "C"]);

    Ok(())
}

#[tokio::test]
async fn test_remove_jobs_by_id_and_args() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    let keep = storage
        .enqueue(&queue, "A", Some(serde_json::json!({ "user": 1 })))
        .await?
        .unwrap();
    let drop_by_id = storage
        .enqueue(&queue, "A", Some(serde_json::json!({ "user": 1 })))
        .await?
        .unwrap();
    storage
        .enqueue(&queue, "A", Some(serde_json::json!({ "user": 2, "extra": true })))
        .await?;

    let removed = storage
        .remove_jobs(
            &queue,
            &[
                rusque::JobMatcher::ClassAndId {
                    class: "A".to_string(),
                    id: drop_by_id.clone(),
                },
                rusque::JobMatcher::ClassAndArgs {
                    class: "A".to_string(),
                    args: serde_json::json!({ "user": 2 })
                        .as_object()
                        .unwrap()
                        .clone(),
                },
            ],
        )
        .await?;
    assert_eq!(removed, 2);

    let remaining = storage.peek(&queue, 0, 10).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep);

    Ok(())
}

#[tokio::test]
async fn test_enqueue_veto() -> TestResult {
    let pool = setup();
    let mut events = rusque::EventBus::new();
    events.on(rusque::Event::BeforeEnqueue, |payload| {
        if payload.class == "Forbidden" {
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

    assert!(storage.enqueue(&queue, "Forbidden", None).await?.is_none());
    assert_eq!(storage.size(&queue).await?, 0);
    assert!(storage.queues().await?.is_empty());

    assert!(storage.enqueue(&queue, "Allowed", None).await?.is_some());
    assert_eq!(storage.size(&queue).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_recreate_propagates_tracking() -> TestResult {
    let storage = random_storage();
    let queue = random_string();

    storage
        .enqueue_tracked(&queue, "A", Some(serde_json::json!({ "n": 1 })))
        .await?
        .unwrap();
    let tracked = storage.pop(&queue).await?.unwrap();

    let recreated = storage.recreate(&tracked).await?.unwrap();
    assert_ne!(recreated, tracked.id);
    assert!(storage.is_tracking(&recreated).await?);

    let copy = storage.pop(&queue).await?.unwrap();
    assert_eq!(copy.class, "A");
    assert_eq!(copy.arguments(), &serde_json::json!({ "n": 1 }));

    storage.enqueue(&queue, "B", None).await?.unwrap();
    let untracked = storage.pop(&queue).await?.unwrap();
    let recreated = storage.recreate(&untracked).await?.unwrap();
    assert!(!storage.is_tracking(&recreated).await?);

    Ok(())
}
