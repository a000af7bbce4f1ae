use std::sync::Arc;

use async_trait::async_trait;
use nyft_common::subject;
use tracing::{debug, info, warn};

use super::Component;
use crate::handler::{Contract, DispatchTable, Handler, Reply};
use crate::transport::Message;

const DISCOVERY_CONTRACT: Contract = Contract {
    input: "empty",
    output: "component id (raw)",
    deadline: None,
};

const STATUS_CONTRACT: Contract = Contract {
    input: "empty",
    output: "StatusSnapshot (JSON)",
    deadline: None,
};

/// Liveness probe and status routes for `component`
pub(super) fn routes(component: &Arc<Component>) -> DispatchTable {
    DispatchTable::new()
        .route(
            subject::DISCOVERY,
            DISCOVERY_CONTRACT,
            DiscoveryHandler {
                component: Arc::clone(component),
            },
        )
        .route(
            subject::status(&component.id()),
            STATUS_CONTRACT,
            StatusHandler {
                component: Arc::clone(component),
            },
        )
}

struct DiscoveryHandler {
    component: Arc<Component>,
}

#[async_trait]
impl Handler for DiscoveryHandler {
    async fn handle(&self, msg: Message) -> Reply {
        if msg.reply.is_none() {
            info!("[Discovery] No reply inbox, skipping...");
            self.component.health.ignored.inc();
            return Reply::Silent;
        }

        self.component.health.probes_answered.inc();
        Reply::send(self.component.id())
    }
}

struct StatusHandler {
    component: Arc<Component>,
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, msg: Message) -> Reply {
        if msg.reply.is_none() {
            info!("[Status] No reply inbox, skipping...");
            self.component.health.ignored.inc();
            return Reply::Silent;
        }

        debug!("[Status] Replying with status...");
        match serde_json::to_vec(&self.component.status()) {
            Ok(payload) => {
                self.component.health.status_answered.inc();
                Reply::send(payload)
            }
            Err(e) => {
                warn!(error = %e, "[Status] Failed to encode snapshot");
                Reply::Silent
            }
        }
    }
}
