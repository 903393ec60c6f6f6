//! HTTP ingress.
//!
//! One endpoint, `POST /`: decode the body as a record, re-encode it, and
//! publish it on the bridge channel.
//!
//! | Outcome                   | Status | Body                    |
//! |---------------------------|--------|-------------------------|
//! | published                 | 200    | empty                   |
//! | malformed body            | 400    | `Bad Request`           |
//! | encode or publish failure | 500    | `Internal Server Error` |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::lifecycle::Shutdown;
use crate::record::Record;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct IngressState {
    broker: Arc<dyn Broker>,
    channel: Arc<str>,
}

impl IngressState {
    pub fn new(broker: Arc<dyn Broker>, channel: impl Into<Arc<str>>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }
}

/// Build the axum router (separated for testing).
pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/", post(publish_record))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the ingress on `listener` until `shutdown` fires.
///
/// Once the signal fires the listener stops accepting connections; requests
/// already in flight run to completion.
pub async fn serve(
    listener: TcpListener,
    state: IngressState,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.fired().await })
        .await?;

    info!("HTTP ingress stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn publish_record(State(state): State<IngressState>, body: Bytes) -> Response {
    let record = match Record::decode(&body) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "Error parsing request body");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let payload = match record.encode() {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Error encoding record");
            return internal_error();
        }
    };

    if let Err(e) = state.broker.publish(&state.channel, payload).await {
        error!(channel = %state.channel, error = %e, "Error publishing record");
        return internal_error();
    }

    debug!(channel = %state.channel, "Record published");
    StatusCode::OK.into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
