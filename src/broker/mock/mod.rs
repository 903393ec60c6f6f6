//! Mock broker implementation for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{Broker, BrokerError, Result, Subscription};
use crate::lifecycle::Shutdown;

/// One scripted outcome of `Subscription::receive`.
#[derive(Debug, Clone)]
pub enum MockReceive {
    Payload(Bytes),
    Error(String),
}

impl MockReceive {
    pub fn payload(bytes: impl Into<Bytes>) -> Self {
        Self::Payload(bytes.into())
    }
}

/// Mock broker for testing.
///
/// Records every publish, can be told to fail publishes, and hands out a
/// scripted subscription.
#[derive(Default)]
pub struct MockBroker {
    published: Mutex<Vec<(String, Bytes)>>,
    publish_attempts: AtomicUsize,
    fail_on_publish: AtomicBool,
    fail_on_subscribe: AtomicBool,
    subscription: Mutex<Option<MockSubscription>>,
    closed: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `subscription` for the next `subscribe` call.
    pub fn with_subscription(self, subscription: MockSubscription) -> Self {
        Self {
            subscription: Mutex::new(Some(subscription)),
            ..self
        }
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_subscribe(&self, fail: bool) {
        self.fail_on_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Number of publish calls, successful or not.
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }

    pub async fn take_published(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.published.lock().await)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("Mock publish failure".to_string()));
        }
        self.published
            .lock()
            .await
            .push((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, _channel: &str) -> Result<Box<dyn Subscription>> {
        if self.fail_on_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe("Mock subscribe failure".to_string()));
        }
        let subscription = self
            .subscription
            .lock()
            .await
            .take()
            .unwrap_or_else(|| MockSubscription::new(Vec::new()));
        Ok(Box::new(subscription))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Counters shared between a `MockSubscription` and the test observing it.
#[derive(Debug, Default)]
pub struct MockSubscriptionStats {
    receive_calls: AtomicUsize,
    close_calls: AtomicUsize,
    dropped: AtomicBool,
}

impl MockSubscriptionStats {
    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the subscription handle has been dropped, closed or not.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Subscription that replays a fixed script, then blocks forever.
pub struct MockSubscription {
    script: VecDeque<MockReceive>,
    fire_when_drained: Option<Shutdown>,
    stats: Arc<MockSubscriptionStats>,
}

impl MockSubscription {
    pub fn new(script: Vec<MockReceive>) -> Self {
        Self {
            script: script.into(),
            fire_when_drained: None,
            stats: Arc::new(MockSubscriptionStats::default()),
        }
    }

    /// Fire `shutdown` as the last scripted receive is handed out.
    pub fn fire_when_drained(mut self, shutdown: Shutdown) -> Self {
        self.fire_when_drained = Some(shutdown);
        self
    }

    pub fn stats(&self) -> Arc<MockSubscriptionStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Subscription for MockSubscription {
    async fn receive(&mut self) -> Result<Bytes> {
        self.stats.receive_calls.fetch_add(1, Ordering::SeqCst);

        let Some(next) = self.script.pop_front() else {
            return futures::future::pending().await;
        };

        if self.script.is_empty() {
            if let Some(shutdown) = &self.fire_when_drained {
                shutdown.fire();
            }
        }

        match next {
            MockReceive::Payload(payload) => Ok(payload),
            MockReceive::Error(message) => Err(BrokerError::Receive(message)),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.stats.dropped.store(true, Ordering::SeqCst);
    }
}
