//! pubsub-bridge: HTTP to broker relay
//!
//! Accepts `POST /` with a JSON user record, publishes it on the configured
//! broker channel, and logs every record received back from that channel.
//!
//! ## Architecture
//! ```text
//! [HTTP client] --POST /--> [ingress] --publish--> [broker channel]
//!                                                        |
//!                                                    subscribe
//!                                                        v
//!                                                  [relay loop] --> log
//! ```
//!
//! ## Configuration
//! - BRIDGE_CONFIG: Path to a YAML config file (or pass `--config <path>`)
//! - BRIDGE__SERVER__PORT: HTTP port (default: 8080)
//! - BRIDGE__BROKER__TYPE: `redis` (default) or `channel`
//! - BRIDGE__BROKER__REDIS__URL: Redis URL (default: redis://localhost:6379)
//! - BRIDGE__CHANNEL: Channel name (default: send-user-data)
//! - BRIDGE_LOG: Log filter (default: info)
//!
//! SIGINT or SIGTERM shuts the bridge down gracefully.

use tracing::{error, info};

use pubsub_bridge::config::Config;
use pubsub_bridge::lifecycle;
use pubsub_bridge::utils::bootstrap::{init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        channel = %config.channel,
        broker_type = ?config.broker.broker_type,
        port = config.server.port,
        "Starting pubsub-bridge"
    );

    let report = lifecycle::run(&config).await.map_err(|e| {
        error!(error = %e, "Bridge failed");
        e
    })?;

    if let Some(relay) = report.relay {
        info!(reported = relay.reported, "pubsub-bridge exited");
    }

    Ok(())
}
