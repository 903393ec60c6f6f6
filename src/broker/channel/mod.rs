//! In-memory channel-based broker for standalone mode.
//!
//! Uses tokio broadcast channels for pub/sub within a single process.
//! Ideal for local development and testing without a Redis server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::{Broker, BrokerError, Result, Subscription};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory broker using one tokio broadcast channel per channel name.
///
/// Payloads are delivered to every subscription open at publish time.
/// Publishing to a channel nobody subscribes to succeeds and drops the
/// payload, matching Redis PUBLISH semantics.
pub struct ChannelBroker {
    senders: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl ChannelBroker {
    /// Create a new channel broker.
    pub fn new() -> Self {
        info!("Channel broker initialized");

        Self {
            senders: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    #[tracing::instrument(name = "broker.publish", skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;

        let senders = self.senders.read().await;
        match senders.get(channel).map(|sender| sender.send(payload)) {
            Some(Ok(receivers)) => {
                debug!(receivers, "Published payload to channel");
            }
            // No receivers, the payload is dropped
            Some(Err(_)) | None => {
                debug!("Published payload (no receivers)");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        self.ensure_open()?;

        let receiver = {
            let mut senders = self.senders.write().await;
            senders
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        info!(channel = %channel, "Subscribed to channel");

        Ok(Box::new(ChannelSubscription {
            channel: channel.to_string(),
            receiver,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders ends every open subscription.
        self.senders.write().await.clear();
        info!("Channel broker closed");
        Ok(())
    }
}

/// Subscription backed by a broadcast receiver.
pub struct ChannelSubscription {
    channel: String,
    receiver: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn receive(&mut self) -> Result<Bytes> {
        match self.receiver.recv().await {
            Ok(payload) => Ok(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(BrokerError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(BrokerError::Closed),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        debug!(channel = %self.channel, "Channel subscription released");
        Ok(())
    }
}
