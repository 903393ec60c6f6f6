//! Redis broker integration tests.
//!
//! Run with: cargo test --test broker_redis --features redis -- --ignored --nocapture
//!
//! Requires: REDIS_URI env var or Redis on localhost:6379
//!
//! Note: Tests use unique channel names to avoid cross-talk between runs,
//! and run serially because one of them kills every pub/sub connection.

use std::time::Duration;

use bytes::Bytes;
use pubsub_bridge::broker::{Broker, RedisBroker};
use pubsub_bridge::Record;
use serial_test::serial;

fn redis_uri() -> String {
    std::env::var("REDIS_URI").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn test_channel() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("test_{}_{}", std::process::id(), nanos)
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
#[serial]
async fn test_redis_publish_reaches_subscription() {
    println!("Connecting to: {}", redis_uri());

    let broker = RedisBroker::connect(&redis_uri())
        .await
        .expect("Failed to connect to Redis");
    let channel = test_channel();

    let mut subscription = broker.subscribe(&channel).await.unwrap();

    let payload = Record::new("Ann", "ann@x.com").encode().unwrap();
    broker.publish(&channel, payload.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), subscription.receive())
        .await
        .expect("no message within 2s")
        .unwrap();
    assert_eq!(received, payload);

    subscription.close().await.unwrap();
    broker.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
#[serial]
async fn test_redis_publish_while_receive_pending() {
    let broker = std::sync::Arc::new(
        RedisBroker::connect(&redis_uri())
            .await
            .expect("Failed to connect to Redis"),
    );
    let channel = test_channel();
    let mut subscription = broker.subscribe(&channel).await.unwrap();

    let pending = tokio::spawn(async move { subscription.receive().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        broker.publish(&channel, Bytes::from_static(b"{}")),
    )
    .await
    .expect("publish blocked behind pending receive")
    .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, Bytes::from_static(b"{}"));
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
#[serial]
async fn test_redis_publish_without_subscribers_succeeds() {
    let broker = RedisBroker::connect(&redis_uri())
        .await
        .expect("Failed to connect to Redis");

    broker
        .publish(&test_channel(), Bytes::from_static(b"{}"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
#[serial]
async fn test_redis_subscription_recovers_after_connection_killed() {
    let broker = RedisBroker::connect(&redis_uri())
        .await
        .expect("Failed to connect to Redis");
    let channel = test_channel();
    let mut subscription = broker.subscribe(&channel).await.unwrap();

    let client = redis::Client::open(redis_uri()).unwrap();
    let mut admin = client.get_multiplexed_async_connection().await.unwrap();
    let killed: i64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("pubsub")
        .query_async(&mut admin)
        .await
        .unwrap();
    assert!(killed >= 1);

    // The receive in progress observes the lost connection
    let lost = tokio::time::timeout(Duration::from_secs(2), subscription.receive())
        .await
        .expect("lost connection not surfaced");
    assert!(lost.is_err());

    // Later receives resubscribe; publish until one lands on the new connection
    let payload = Record::new("Ann", "ann@x.com").encode().unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let received = loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscription never recovered"
        );

        let publisher = {
            let channel = channel.clone();
            let payload = payload.clone();
            let broker = RedisBroker::connect(&redis_uri()).await.unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                broker.publish(&channel, payload).await
            })
        };

        let attempt = tokio::time::timeout(Duration::from_millis(500), subscription.receive()).await;
        publisher.await.unwrap().unwrap();
        if let Ok(Ok(bytes)) = attempt {
            break bytes;
        }
    };

    assert_eq!(received, payload);
}
