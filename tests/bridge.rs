//! End-to-end bridge tests.
//!
//! Runs the full bridge (ingress, relay, lifecycle) on an ephemeral port
//! against the in-memory channel broker and drives it over real HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pubsub_bridge::broker::{Broker, ChannelBroker, MockBroker};
use pubsub_bridge::config::Config;
use pubsub_bridge::relay::RecordSink;
use pubsub_bridge::{Bridge, Record, RunningBridge};

/// Sink that keeps every relayed record.
#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<Record>>,
}

impl CollectingSink {
    fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<Record> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let records = self.records();
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl RecordSink for CollectingSink {
    fn report(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }
}

fn test_config() -> Config {
    let mut config = Config::for_test();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.shutdown_timeout_secs = 1;
    config
}

async fn start(broker: Arc<dyn Broker>, sink: Arc<CollectingSink>) -> RunningBridge {
    Bridge::new(&test_config(), broker)
        .with_sink(sink)
        .start()
        .await
        .expect("bridge failed to start")
}

fn url(bridge: &RunningBridge) -> String {
    format!("http://{}/", bridge.local_addr())
}

async fn stop(bridge: RunningBridge) {
    bridge.shutdown().fire();
    tokio::time::timeout(Duration::from_secs(5), bridge.wait())
        .await
        .expect("bridge did not stop")
        .expect("bridge stopped with error");
}

#[tokio::test]
async fn test_post_is_relayed_back() {
    let sink = Arc::new(CollectingSink::default());
    let bridge = start(Arc::new(ChannelBroker::new()), sink.clone()).await;

    let response = reqwest::Client::new()
        .post(url(&bridge))
        .header("content-type", "application/json")
        .body(r#"{"name":"Ann","email":"ann@x.com"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().is_empty());
    assert_eq!(
        sink.wait_for(1).await,
        vec![Record::new("Ann", "ann@x.com")]
    );

    stop(bridge).await;
}

#[tokio::test]
async fn test_records_relayed_in_order() {
    let sink = Arc::new(CollectingSink::default());
    let bridge = start(Arc::new(ChannelBroker::new()), sink.clone()).await;
    let client = reqwest::Client::new();

    let sent: Vec<Record> = (0..5)
        .map(|i| Record::new(format!("user{i}"), format!("user{i}@x.com")))
        .collect();
    for record in &sent {
        let response = client.post(url(&bridge)).json(record).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    assert_eq!(sink.wait_for(sent.len()).await, sent);

    stop(bridge).await;
}

#[tokio::test]
async fn test_malformed_post_is_rejected_and_not_relayed() {
    let sink = Arc::new(CollectingSink::default());
    let bridge = start(Arc::new(ChannelBroker::new()), sink.clone()).await;
    let client = reqwest::Client::new();

    let response = client.post(url(&bridge)).body("{oops").send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "Bad Request");

    // A valid record afterwards is still relayed, and is the only one
    let response = client
        .post(url(&bridge))
        .body(r#"{"name":"Bo"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(sink.wait_for(1).await, vec![Record::new("Bo", "")]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.records().len(), 1);

    stop(bridge).await;
}

#[tokio::test]
async fn test_publish_failure_returns_500() {
    let sink = Arc::new(CollectingSink::default());
    let broker = Arc::new(MockBroker::new());
    broker.set_fail_on_publish(true);
    let bridge = start(broker.clone(), sink).await;

    let response = reqwest::Client::new()
        .post(url(&bridge))
        .body(r#"{"name":"Ann","email":"ann@x.com"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Internal Server Error");
    assert_eq!(broker.publish_attempts(), 1);

    stop(bridge).await;
    assert!(broker.is_closed());
}

#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let sink = Arc::new(CollectingSink::default());
    let bridge = start(Arc::new(ChannelBroker::new()), sink).await;
    let addr = bridge.local_addr();

    stop(bridge).await;

    let result = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .body("{}")
        .send()
        .await;
    assert!(result.is_err(), "listener still accepting after shutdown");
}
