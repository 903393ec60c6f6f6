//! Relay loop.
//!
//! Drains the bridge channel and reports every record it can decode. The
//! loop is an explicit state machine:
//!
//! ```text
//! Running --(shutdown observed before a receive)--> Draining --> Stopped
//! ```
//!
//! The shutdown signal is checked once per iteration, before each receive.
//! A receive already in flight is never preempted; it completes or fails on
//! its own and the loop stops at the next check.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::broker::Subscription;
use crate::lifecycle::Shutdown;
use crate::record::Record;

/// Relay loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Pause after a failed receive before checking for shutdown again.
    pub receive_error_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            receive_error_backoff_ms: 100,
        }
    }
}

impl RelayConfig {
    pub fn receive_error_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_error_backoff_ms)
    }
}

/// Relay loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Running,
    Draining,
    Stopped,
}

/// Destination for records decoded by the relay loop.
pub trait RecordSink: Send + Sync {
    fn report(&self, record: Record);
}

/// Sink that logs each record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RecordSink for LogSink {
    fn report(&self, record: Record) {
        info!(name = %record.name, email = %record.email, "Received user data");
    }
}

/// Counters collected over one run of the relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub state: RelayState,
    /// Payloads successfully received from the subscription.
    pub received: u64,
    /// Records handed to the sink.
    pub reported: u64,
    pub decode_failures: u64,
    pub receive_failures: u64,
}

impl Default for RelayReport {
    fn default() -> Self {
        Self {
            state: RelayState::Running,
            received: 0,
            reported: 0,
            decode_failures: 0,
            receive_failures: 0,
        }
    }
}

/// Long-running task that drains one subscription.
pub struct RelayLoop {
    channel: String,
    subscription: Box<dyn Subscription>,
    sink: Arc<dyn RecordSink>,
    shutdown: Shutdown,
    receive_error_backoff: Duration,
    state: RelayState,
}

impl RelayLoop {
    /// Create a relay loop in the `Running` state.
    ///
    /// The subscription must already be established.
    pub fn new(
        channel: impl Into<String>,
        subscription: Box<dyn Subscription>,
        sink: Arc<dyn RecordSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            channel: channel.into(),
            subscription,
            sink,
            shutdown,
            receive_error_backoff: RelayConfig::default().receive_error_backoff(),
            state: RelayState::Running,
        }
    }

    pub fn with_config(mut self, config: &RelayConfig) -> Self {
        self.receive_error_backoff = config.receive_error_backoff();
        self
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Run until the shutdown signal is observed.
    ///
    /// The subscription is closed exactly once on exit.
    pub async fn run(mut self) -> RelayReport {
        let mut report = RelayReport::default();

        info!(channel = %self.channel, "Relay loop running");

        while self.state == RelayState::Running {
            if self.shutdown.is_fired() {
                self.transition(RelayState::Draining);
                break;
            }

            match self.subscription.receive().await {
                Ok(payload) => {
                    report.received += 1;
                    match Record::decode(&payload) {
                        Ok(record) => {
                            self.sink.report(record);
                            report.reported += 1;
                        }
                        Err(e) => {
                            warn!(channel = %self.channel, error = %e, "Skipping undecodable payload");
                            report.decode_failures += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Error receiving message");
                    report.receive_failures += 1;
                    if !self.receive_error_backoff.is_zero() {
                        tokio::time::sleep(self.receive_error_backoff).await;
                    }
                }
            }
        }

        let Self {
            channel,
            subscription,
            state,
            ..
        } = self;

        if let Err(e) = subscription.close().await {
            warn!(channel = %channel, error = %e, "Failed to close subscription");
        }

        debug!(channel = %channel, from = ?state, to = ?RelayState::Stopped, "Relay state change");
        report.state = RelayState::Stopped;

        info!(
            channel = %channel,
            received = report.received,
            reported = report.reported,
            decode_failures = report.decode_failures,
            receive_failures = report.receive_failures,
            "Relay loop stopped"
        );

        report
    }

    fn transition(&mut self, next: RelayState) {
        debug!(channel = %self.channel, from = ?self.state, to = ?next, "Relay state change");
        self.state = next;
    }
}
