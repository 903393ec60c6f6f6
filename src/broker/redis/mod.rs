//! Redis broker implementation.
//!
//! Publishes through a `ConnectionManager` (multiplexed, safe to clone per
//! call) and subscribes on a dedicated pub/sub connection, so a receive
//! blocked on the subscription never holds up a publish. A dropped pub/sub
//! connection fails the receive in progress and is re-opened on the next one.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use ::redis::{aio::ConnectionManager, AsyncCommands, Client, Msg, RedisResult};
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, Result, Subscription};

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Open a pub/sub connection subscribed to `channel`.
async fn open_message_stream(client: &Client, channel: &str) -> RedisResult<MessageStream> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(Box::pin(pubsub.into_on_message()))
}

/// Redis pub/sub broker.
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::Connection(format!("{url}: {e}")))?;

        info!(url = %url, "Connected to Redis broker");

        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    #[tracing::instrument(name = "broker.publish", skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();

        let receivers: i64 = conn
            .publish(channel, payload.as_ref())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        debug!(receivers, "Published payload to Redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let messages = open_message_stream(&self.client, channel)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        info!(channel = %channel, "Subscribed to Redis channel");

        Ok(Box::new(RedisSubscription {
            client: self.client.clone(),
            channel: channel.to_string(),
            messages: Some(messages),
        }))
    }

    async fn close(&self) -> Result<()> {
        // The connection manager closes its socket once the last clone drops.
        info!("Redis broker closed");
        Ok(())
    }
}

/// Subscription on a dedicated Redis pub/sub connection.
pub struct RedisSubscription {
    client: Client,
    channel: String,
    /// `None` after the connection was lost, until the next receive re-opens it.
    messages: Option<MessageStream>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn receive(&mut self) -> Result<Bytes> {
        let messages = match self.messages.take() {
            Some(messages) => messages,
            None => {
                let messages = open_message_stream(&self.client, &self.channel)
                    .await
                    .map_err(|e| BrokerError::Receive(format!("resubscribe failed: {e}")))?;
                info!(channel = %self.channel, "Resubscribed to Redis channel");
                messages
            }
        };
        let messages = self.messages.insert(messages);

        match messages.next().await {
            Some(msg) => Ok(Bytes::copy_from_slice(msg.get_payload_bytes())),
            None => {
                warn!(channel = %self.channel, "Redis pub/sub connection lost");
                self.messages = None;
                Err(BrokerError::Closed)
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the stream drops the pub/sub connection, which ends the
        // subscription server-side.
        debug!(channel = %self.channel, "Redis subscription released");
        Ok(())
    }
}
