//! Ride request handling
//!
//! Eligibility is an exact, case-sensitive comparison between the requested
//! vehicle kind and the agent's own kind. Ineligible agents stay silent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nyft::handler::{Contract, DispatchTable, Handler, Reply};
use nyft::metrics::counter_vec;
use nyft::transport::Message;
use nyft::{Component, Result};
use nyft_common::{subject, DriveRequest};
use prometheus::IntCounterVec;
use rand::Rng;
use tracing::{debug, info, warn};

/// Component kind reported in discovery and status replies
pub const COMPONENT_KIND: &str = "driver-agent";

pub const DEFAULT_VEHICLE_KIND: &str = "regular";

const RIDES_CONTRACT: Contract = Contract {
    input: "DriveRequest (JSON)",
    output: "driver id (raw)",
    deadline: None,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub vehicle_kind: String,
    /// Upper bound (exclusive) of the random delay before offering a ride
    pub max_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            vehicle_kind: DEFAULT_VEHICLE_KIND.to_string(),
            max_delay: Duration::from_secs(1),
        }
    }
}

pub struct DriverAgent {
    component: Arc<Component>,
    config: AgentConfig,
    requests: IntCounterVec,
}

impl DriverAgent {
    pub fn new(component: Arc<Component>, config: AgentConfig) -> Result<Arc<Self>> {
        let requests = counter_vec(
            component.registry(),
            "nyft_ride_requests_total",
            "Ride requests seen, by decision",
            &["decision"],
        )?;

        Ok(Arc::new(Self {
            component,
            config,
            requests,
        }))
    }

    pub fn vehicle_kind(&self) -> &str {
        &self.config.vehicle_kind
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn is_eligible(&self, request: &DriveRequest) -> bool {
        request.kind == self.config.vehicle_kind
    }

    pub fn routes(self: &Arc<Self>) -> DispatchTable {
        DispatchTable::new().route(
            subject::RIDES,
            RIDES_CONTRACT,
            RideHandler {
                agent: Arc::clone(self),
            },
        )
    }

    /// Start answering ride requests
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.component.serve(self.routes()).await
    }

    /// Decide on one ride request. Returns the id to reply with, or `None` to
    /// stay silent.
    pub async fn on_drive_request(&self, request: &DriveRequest) -> Option<String> {
        debug!(
            request_id = %request.request_id,
            kind = %request.kind,
            "Driver ride request"
        );

        if !self.is_eligible(request) {
            debug!(request_id = %request.request_id, "Skipping request for another vehicle kind");
            self.requests.with_label_values(&["skipped"]).inc();
            return None;
        }
        info!(request_id = %request.request_id, "Available to handle request");

        let delay = self.acceptance_delay();
        info!(
            request_id = %request.request_id,
            delay_ms = delay.as_millis() as u64,
            "Backing off before replying"
        );
        tokio::time::sleep(delay).await;

        self.requests.with_label_values(&["offered"]).inc();
        Some(self.component.id())
    }

    fn acceptance_delay(&self) -> Duration {
        let max_ms = self.config.max_delay.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

struct RideHandler {
    agent: Arc<DriverAgent>,
}

#[async_trait]
impl Handler for RideHandler {
    async fn handle(&self, msg: Message) -> Reply {
        let request = match DriveRequest::decode(&msg.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed ride request");
                self.agent.requests.with_label_values(&["malformed"]).inc();
                return Reply::Silent;
            }
        };

        match self.agent.on_drive_request(&request).await {
            Some(id) => Reply::send(id),
            None => Reply::Silent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(kind: &str, max_delay: Duration) -> Arc<DriverAgent> {
        let component = Component::new(COMPONENT_KIND).unwrap();
        DriverAgent::new(
            component,
            AgentConfig {
                vehicle_kind: kind.to_string(),
                max_delay,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_eligibility_is_exact_and_case_sensitive() {
        let agent = agent("regular", Duration::ZERO);

        assert!(agent.is_eligible(&DriveRequest::new("regular")));
        assert!(!agent.is_eligible(&DriveRequest::new("Regular")));
        assert!(!agent.is_eligible(&DriveRequest::new("regular ")));
        assert!(!agent.is_eligible(&DriveRequest::new("reg")));
        assert!(!agent.is_eligible(&DriveRequest::new("large")));
    }

    #[tokio::test]
    async fn test_ineligible_request_stays_silent() {
        let agent = agent("regular", Duration::ZERO);
        let request = DriveRequest::new("large").with_request_id("req-1");

        assert_eq!(agent.on_drive_request(&request).await, None);
        assert_eq!(agent.requests.with_label_values(&["skipped"]).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eligible_request_offers_own_id_within_max_delay() {
        let agent = agent("large", Duration::from_millis(1000));
        let request = DriveRequest::new("large").with_request_id("req-2");

        let started = tokio::time::Instant::now();
        let offered = agent.on_drive_request(&request).await;

        assert_eq!(offered, Some(agent.component().id()));
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(agent.requests.with_label_values(&["offered"]).get(), 1);
    }

    #[test]
    fn test_zero_max_delay_disables_backoff() {
        let agent = agent("regular", Duration::ZERO);
        assert_eq!(agent.acceptance_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped() {
        let agent = agent("regular", Duration::ZERO);
        let handler = RideHandler {
            agent: agent.clone(),
        };

        let reply = handler
            .handle(Message {
                subject: subject::RIDES.to_string(),
                reply: Some("_INBOX.test".to_string()),
                payload: "not json".into(),
            })
            .await;

        assert_eq!(reply, Reply::Silent);
        assert_eq!(agent.requests.with_label_values(&["malformed"]).get(), 1);
    }
}
