//! Lifecycle coordination.
//!
//! Owns the process-wide shutdown signal and the ordered startup/teardown
//! of the bridge:
//!
//! ```text
//! start:    broker ─▶ subscribe ─▶ bind listener ─▶ spawn relay ─▶ spawn HTTP
//! shutdown: signal ─▶ HTTP stops accepting, drains ─▶ relay reaches Stopped
//!                  ─▶ subscription released ─▶ broker closed
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{init_broker, Broker, BrokerError};
use crate::config::Config;
use crate::ingress::{self, IngressState};
use crate::relay::{LogSink, RecordSink, RelayConfig, RelayLoop, RelayReport};

// ============================================================================
// Shutdown Signal
// ============================================================================

/// One-shot broadcast shutdown signal.
///
/// Clones observe the same signal. Firing is idempotent.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the call that actually fired it; later calls
    /// are no-ops.
    pub fn fire(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal fires.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// Returns the name of the signal received.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Spawn a task that fires `shutdown` on SIGINT or SIGTERM.
///
/// Keeps listening after the first signal so that repeated signals are
/// absorbed instead of killing the process mid-teardown.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(signal) => {
                    if shutdown.fire() {
                        info!(signal, "Termination signal received, shutting down");
                    } else {
                        debug!(signal, "Shutdown already in progress, ignoring signal");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to install signal handler, shutting down");
                    shutdown.fire();
                    return;
                }
            }
        }
    })
}

// ============================================================================
// Bridge
// ============================================================================

/// Errors that stop the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Broker unavailable: {0}")]
    Broker(#[source] BrokerError),

    #[error("Failed to subscribe to channel '{channel}': {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to bind HTTP listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of a completed bridge run.
#[derive(Debug)]
pub struct BridgeReport {
    /// Relay counters, or `None` if the relay had to be aborted.
    pub relay: Option<RelayReport>,
}

/// Bridge wiring, ready to start.
pub struct Bridge {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn RecordSink>,
    shutdown: Shutdown,
    channel: String,
    address: String,
    relay: RelayConfig,
    shutdown_timeout: Duration,
}

impl Bridge {
    pub fn new(config: &Config, broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            sink: Arc::new(LogSink),
            shutdown: Shutdown::new(),
            channel: config.channel.clone(),
            address: config.server.bind_address(),
            relay: config.relay.clone(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Report relayed records to `sink` instead of the log.
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Subscribe, bind, and spawn the relay and HTTP tasks.
    ///
    /// The subscription is established before the listener starts serving.
    /// Any failure here is a fatal startup error.
    pub async fn start(self) -> Result<RunningBridge, BridgeError> {
        let subscription =
            self.broker
                .subscribe(&self.channel)
                .await
                .map_err(|source| BridgeError::Subscribe {
                    channel: self.channel.clone(),
                    source,
                })?;

        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| BridgeError::Bind {
                address: self.address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            address: self.address.clone(),
            source,
        })?;

        let relay = RelayLoop::new(
            self.channel.clone(),
            subscription,
            self.sink,
            self.shutdown.clone(),
        )
        .with_config(&self.relay);
        let relay = tokio::spawn(relay.run());

        let state = IngressState::new(Arc::clone(&self.broker), self.channel.clone());
        let http = tokio::spawn(ingress::serve(listener, state, self.shutdown.clone()));

        info!(
            address = %local_addr,
            channel = %self.channel,
            "Bridge running"
        );

        Ok(RunningBridge {
            local_addr,
            broker: self.broker,
            shutdown: self.shutdown,
            shutdown_timeout: self.shutdown_timeout,
            http,
            relay,
        })
    }
}

/// A started bridge.
pub struct RunningBridge {
    local_addr: SocketAddr,
    broker: Arc<dyn Broker>,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
    http: JoinHandle<std::io::Result<()>>,
    relay: JoinHandle<RelayReport>,
}

impl RunningBridge {
    /// Address the HTTP listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Block until the shutdown signal fires, then tear down in order.
    ///
    /// If the HTTP server fails on its own, the shutdown signal is fired so
    /// the relay stops too.
    pub async fn wait(self) -> Result<BridgeReport, BridgeError> {
        let Self {
            broker,
            shutdown,
            shutdown_timeout,
            mut http,
            mut relay,
            ..
        } = self;

        let finished_early = tokio::select! {
            _ = shutdown.fired() => None,
            result = &mut http => Some(result),
        };

        let http_result = match finished_early {
            Some(result) => {
                warn!("HTTP server exited before shutdown, stopping bridge");
                shutdown.fire();
                result
            }
            None => {
                info!("Shutdown signal observed, stopping HTTP server");
                http.await
            }
        };

        // The relay may be parked in a receive that never completes.
        let relay_report = match tokio::time::timeout(shutdown_timeout, &mut relay).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                error!(error = %e, "Relay task failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout = ?shutdown_timeout,
                    "Relay loop still waiting on a receive, aborting"
                );
                relay.abort();
                // Resolves once the task is dropped, releasing the subscription
                let _ = relay.await;
                None
            }
        };

        if let Err(e) = broker.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }

        http_result?.map_err(BridgeError::Serve)?;

        info!("Bridge stopped");

        Ok(BridgeReport {
            relay: relay_report,
        })
    }
}

/// Run the bridge described by `config` until SIGINT or SIGTERM.
pub async fn run(config: &Config) -> Result<BridgeReport, BridgeError> {
    let broker = init_broker(&config.broker)
        .await
        .map_err(BridgeError::Broker)?;

    let shutdown = Shutdown::new();
    let _signals = spawn_signal_listener(shutdown.clone());

    Bridge::new(config, broker)
        .with_shutdown(shutdown)
        .start()
        .await?
        .wait()
        .await
}
