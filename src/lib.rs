//! pubsub-bridge - HTTP to broker relay
//!
//! Accepts user records over HTTP, republishes them on a broker channel,
//! and concurrently consumes that channel, logging every record received.

pub mod broker;
pub mod config;
pub mod ingress;
pub mod lifecycle;
pub mod record;
pub mod relay;
pub mod utils;

pub use lifecycle::{Bridge, BridgeError, RunningBridge, Shutdown};
pub use record::Record;
