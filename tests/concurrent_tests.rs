mod common;

use pgfifo::{CallbackError, Config, Queue};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(30);

/// Two workers racing on one topic must partition the backlog: their
/// delivered id sets are disjoint and together cover everything published.
#[tokio::test]
async fn test_competing_workers_never_double_deliver() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::start_postgres().await?;
    let config = Config::from_dsn(&db.dsn)
        .with_poll_interval_ms(5)
        .with_subscription_batch_size(5)?;
    let queue = Queue::with_config(config).await?;

    let mut published = HashSet::new();
    for n in 0..40 {
        published.insert(queue.publish("shared", format!("{}", n).as_bytes()).await?);
    }

    let seen_a = Arc::new(Mutex::new(Vec::<i64>::new()));
    let seen_b = Arc::new(Mutex::new(Vec::<i64>::new()));

    for seen in [&seen_a, &seen_b] {
        let seen_cb = seen.clone();
        queue
            .subscribe("shared", move |batch| {
                let seen = seen_cb.clone();
                async move {
                    // Hold the lease long enough for the cycles to overlap.
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    seen.lock().unwrap().extend(batch.iter().map(|m| m.id));
                    Ok::<(), CallbackError>(())
                }
            })
            .await?;
    }

    assert!(
        common::wait_for_pending(&queue, "shared", 0, WAIT).await,
        "both workers together should drain the backlog"
    );
    queue.shutdown().await;

    let ids_a: HashSet<i64> = seen_a.lock().unwrap().iter().copied().collect();
    let ids_b: HashSet<i64> = seen_b.lock().unwrap().iter().copied().collect();

    let overlap: Vec<_> = ids_a.intersection(&ids_b).collect();
    assert!(
        overlap.is_empty(),
        "no message id may be delivered to both workers: {:?}",
        overlap
    );

    let union: HashSet<i64> = ids_a.union(&ids_b).copied().collect();
    assert_eq!(union, published, "every published message is delivered");

    // No worker saw the same id twice either (committed leases delete).
    assert_eq!(
        seen_a.lock().unwrap().len() + seen_b.lock().unwrap().len(),
        published.len()
    );

    Ok(())
}

/// Publishes are independent of the locked-row set: a held lease on one
/// batch does not block new inserts or leases of other messages.
#[tokio::test]
async fn test_publish_during_held_lease() -> Result<(), Box<dyn std::error::Error>> {
    let db = common::start_postgres().await?;
    let config = Config::from_dsn(&db.dsn)
        .with_poll_interval_ms(10)
        .with_subscription_batch_size(1)?;
    let queue = Queue::with_config(config).await?;

    queue.publish("slow", b"first").await?;

    let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let seen_cb = seen.clone();
    queue
        .subscribe("slow", move |batch| {
            let seen = seen_cb.clone();
            async move {
                // Slow consumer: the lease transaction stays open here.
                tokio::time::sleep(Duration::from_millis(150)).await;
                seen.lock().unwrap().extend(batch.into_iter().map(|m| m.payload));
                Ok::<(), CallbackError>(())
            }
        })
        .await?;

    // While the first lease is held, publishing must not block.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let publish = tokio::time::timeout(
        Duration::from_secs(2),
        queue.publish("slow", b"second"),
    )
    .await;
    assert!(publish.is_ok(), "publish blocked behind a held lease");
    publish.unwrap()?;

    assert!(common::wait_for_pending(&queue, "slow", 0, WAIT).await);
    assert_eq!(seen.lock().unwrap().len(), 2);

    queue.shutdown().await;
    Ok(())
}
