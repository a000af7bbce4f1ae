//! HTTP bridge
//!
//! `POST /v1/rides` takes a [`DriveRequest`] body and forwards it unchanged as a
//! find request. The dispatcher's JSON reply is returned as-is with `200`; a
//! fabric failure or timeout yields `503` with the "no drivers" response.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use nyft::lifecycle::ConnectionState;
use nyft::transport::Transport;
use nyft::Result;
use nyft_common::{subject, DriveRequest, DriveResponse};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::encode_response;

#[derive(Clone)]
pub struct BridgeState {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl BridgeState {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            request_timeout,
        }
    }
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/v1/rides", post(create_ride))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve the bridge on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: BridgeState,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Listening for HTTP requests on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub async fn create_ride(
    State(state): State<BridgeState>,
    Json(request): Json<DriveRequest>,
) -> Response {
    let payload = match request.encode() {
        Ok(payload) => Bytes::from(payload),
        Err(e) => {
            warn!(error = %e, "Failed to encode ride request");
            return unavailable();
        }
    };

    match state
        .transport
        .request(subject::FIND, payload, state.request_timeout)
        .await
    {
        Ok(reply) => json(StatusCode::OK, reply.payload),
        Err(e) => {
            warn!(kind = %request.kind, error = %e, "Find request failed");
            unavailable()
        }
    }
}

async fn healthz(State(state): State<BridgeState>) -> impl IntoResponse {
    match state.transport.lifecycle().state() {
        ConnectionState::Connected => (StatusCode::OK, "ok".to_string()),
        other => (StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    }
}

fn unavailable() -> Response {
    json(
        StatusCode::SERVICE_UNAVAILABLE,
        encode_response(&DriveResponse::unavailable()),
    )
}

fn json(status: StatusCode, body: Bytes) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
