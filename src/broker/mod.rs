//! Broker client abstraction.
//!
//! This module contains:
//! - `Broker` trait: publish payloads to a channel, open subscriptions
//! - `Subscription` trait: receive payloads from an open subscription
//! - Broker configuration types
//! - Implementations: Redis, in-memory channel, Mock

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::info;

// Implementation modules
pub mod channel;
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

// Re-exports
pub use channel::ChannelBroker;
pub use mock::{MockBroker, MockReceive, MockSubscription};
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

// ============================================================================
// Traits
// ============================================================================

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    #[error("Broker connection closed")]
    Closed,

    #[error("Broker type '{0}' requires the '{0}' feature")]
    FeatureDisabled(&'static str),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Interface to the message broker.
///
/// Publish and subscribe are independent: a receive pending on a
/// subscription never blocks a concurrent publish on the same broker.
///
/// Implementations:
/// - `RedisBroker`: Redis PUBLISH / SUBSCRIBE
/// - `ChannelBroker`: In-process broadcast channels
/// - `MockBroker`: Scripted broker for testing
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// Delivery is at-most-once; nothing is queued or retried on failure.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Open a subscription bound to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Release the broker connection.
    ///
    /// Called once during shutdown, after the ingress has stopped accepting
    /// requests and the relay has released its subscription.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// An open, stateful subscription to one channel.
///
/// `close` consumes the handle, so a subscription is released at most once.
/// Dropping an unclosed handle releases it as well.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next payload on the channel.
    ///
    /// May block indefinitely. Errors are per-call; the subscription stays
    /// usable unless the error says otherwise.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Release the subscription.
    async fn close(self: Box<Self>) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Broker type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// Redis pub/sub.
    #[default]
    Redis,
    /// In-process broadcast channels.
    Channel,
}

/// Broker configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker type discriminator.
    #[serde(rename = "type")]
    pub broker_type: BrokerType,
    /// Redis-specific configuration.
    pub redis: RedisConfig,
}

/// Redis-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the broker based on configuration.
///
/// Failure here is fatal for the process: the bridge never starts serving
/// without a broker connection.
pub async fn init_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    match config.broker_type {
        BrokerType::Redis => {
            #[cfg(feature = "redis")]
            {
                let broker = RedisBroker::connect(&config.redis.url).await?;
                info!(broker_type = "redis", "Broker initialized");
                Ok(Arc::new(broker))
            }

            #[cfg(not(feature = "redis"))]
            {
                Err(BrokerError::FeatureDisabled("redis"))
            }
        }
        BrokerType::Channel => {
            info!(broker_type = "channel", "Broker initialized");
            Ok(Arc::new(ChannelBroker::new()))
        }
    }
}

#[cfg(test)]
mod tests;
