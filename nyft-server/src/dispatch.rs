//! Find request handling
//!
//! A find request is normalized (fresh id when missing), re-published on
//! `drivers.rides` and answered with whichever agent replies first. Every handled
//! request gets exactly one [`DriveResponse`] back; malformed payloads get none.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nyft::handler::{Contract, DispatchTable, Handler, Reply};
use nyft::metrics::{counter, counter_vec};
use nyft::transport::Message;
use nyft::{Component, Result};
use nyft_common::{group, subject, DriveRequest, DriveResponse};
use prometheus::{IntCounter, IntCounterVec};
use tracing::{debug, info, warn};

/// Component kind reported in discovery and status replies
pub const COMPONENT_KIND: &str = "nyft-service";

/// Pre-encoded "no drivers" response, used when encoding itself fails
pub static FALLBACK_RESPONSE: &[u8] = br#"{"error":"No drivers available found, sorry!"}"#;

/// Extra time the find route allows beyond the fan-out timeout
const HANDLER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// How long to wait for the first agent to offer itself
    pub find_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            find_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
struct FindMetrics {
    outcomes: IntCounterVec,
    malformed: IntCounter,
}

pub struct DispatchService {
    component: Arc<Component>,
    config: DispatchConfig,
    metrics: FindMetrics,
}

impl DispatchService {
    pub fn new(component: Arc<Component>, config: DispatchConfig) -> Result<Arc<Self>> {
        let registry = component.registry();
        let metrics = FindMetrics {
            outcomes: counter_vec(
                registry,
                "nyft_find_requests_total",
                "Find requests answered, by outcome",
                &["outcome"],
            )?,
            malformed: counter(
                registry,
                "nyft_find_requests_malformed_total",
                "Find requests dropped because the payload did not parse",
            )?,
        };

        Ok(Arc::new(Self {
            component,
            config,
            metrics,
        }))
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn routes(self: &Arc<Self>) -> DispatchTable {
        DispatchTable::new().queue_route(
            subject::FIND,
            group::MANAGER,
            Contract {
                input: "DriveRequest (JSON)",
                output: "DriveResponse (JSON)",
                deadline: Some(self.config.find_timeout + HANDLER_GRACE),
            },
            FindHandler {
                service: Arc::clone(self),
            },
        )
    }

    /// Join the `manager` group and start answering find requests
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.component.serve(self.routes()).await
    }

    /// Fan a request out to the agents and turn the first offer into a response.
    ///
    /// Never fails: timeouts and transport errors become the "no drivers" response.
    pub async fn handle_find(&self, mut request: DriveRequest) -> DriveResponse {
        let request_id = request.ensure_request_id().to_string();
        info!(request_id = %request_id, kind = %request.kind, "Requesting a driver");

        let response = self.find_driver(&request).await;
        match response.assigned_id() {
            Some(driver_id) => {
                info!(request_id = %request_id, driver_id, "Driver assigned");
                self.metrics.outcomes.with_label_values(&["assigned"]).inc();
            }
            None => {
                self.metrics.outcomes.with_label_values(&["unavailable"]).inc();
            }
        }
        response
    }

    async fn find_driver(&self, request: &DriveRequest) -> DriveResponse {
        let payload = match request.encode() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Failed to encode ride request");
                return DriveResponse::unavailable();
            }
        };

        let transport = match self.component.transport() {
            Ok(transport) => transport,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "No transport for ride request");
                return DriveResponse::unavailable();
            }
        };

        match transport
            .request(subject::RIDES, payload, self.config.find_timeout)
            .await
        {
            Ok(reply) => DriveResponse::assigned(String::from_utf8_lossy(&reply.payload)),
            Err(e) if e.is_timeout() => {
                info!(request_id = %request.request_id, "No driver replied in time");
                DriveResponse::unavailable()
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Ride request failed");
                DriveResponse::unavailable()
            }
        }
    }
}

/// Encode a response, falling back to the "no drivers" response and finally to a
/// static payload so that a reply can always be sent
pub fn encode_response(response: &DriveResponse) -> Bytes {
    match response.encode() {
        Ok(payload) => Bytes::from(payload),
        Err(e) => {
            warn!(error = %e, "Failed to encode response, sending error payload");
            DriveResponse::unavailable()
                .encode()
                .map(Bytes::from)
                .unwrap_or_else(|_| Bytes::from_static(FALLBACK_RESPONSE))
        }
    }
}

struct FindHandler {
    service: Arc<DispatchService>,
}

#[async_trait]
impl Handler for FindHandler {
    async fn handle(&self, msg: Message) -> Reply {
        let request = match DriveRequest::decode(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed find request, dropping");
                self.service.metrics.malformed.inc();
                return Reply::Silent;
            }
        };

        if msg.reply.is_none() {
            debug!(request_id = %request.request_id, "Find request without reply inbox");
        }

        let response = self.service.handle_find(request).await;
        Reply::Send(encode_response(&response))
    }

    fn fallback(&self, _msg: &Message) -> Reply {
        self.service
            .metrics
            .outcomes
            .with_label_values(&["unavailable"])
            .inc();
        Reply::Send(Bytes::from_static(FALLBACK_RESPONSE))
    }
}
