//! Discovery aggregator
//!
//! A discovery round broadcasts one liveness probe with a fresh reply inbox and
//! collects however many components answer. The round ends when either:
//! - no reply arrived within the idle window since the last one, or
//! - the hard deadline passed (also the bound when nobody answers at all)
//!
//! Each discovered id can then be asked for its status point-to-point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use nyft_common::{subject, DiscoveryReply, StatusSnapshot};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::transport::Transport;
use crate::{NyftError, Result};

/// Stand-in for deadlines too far out to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of a full survey: who answered, and the snapshots that could be fetched
#[derive(Debug, Clone, Serialize)]
pub struct Survey {
    pub replies: Vec<DiscoveryReply>,
    pub statuses: Vec<StatusSnapshot>,
    #[serde(with = "millis")]
    pub discovery_time: Duration,
}

pub struct Discovery {
    transport: Arc<dyn Transport>,
}

impl Discovery {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run one discovery round.
    ///
    /// Replies are returned in arrival order with duplicates collapsed.
    pub async fn discover(
        &self,
        hard_deadline: Duration,
        idle_window: Duration,
    ) -> Result<Vec<DiscoveryReply>> {
        let started = Instant::now();
        let hard_stop = deadline_after(started, hard_deadline);

        let inbox = self.transport.new_inbox();
        let mut inbound = self.transport.subscribe(&inbox).await?;
        self.transport
            .publish_request(subject::DISCOVERY, &inbox, Bytes::new())
            .await?;

        let mut seen = HashSet::new();
        let mut replies = Vec::new();
        let mut deadline = hard_stop;

        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, inbound.next()).await {
            let id = String::from_utf8_lossy(&msg.payload).into_owned();
            if id.is_empty() {
                debug!("Ignoring empty discovery reply");
            } else if seen.insert(id.clone()) {
                replies.push(DiscoveryReply::from(id));
            }

            deadline = hard_stop.min(deadline_after(Instant::now(), idle_window));
        }

        info!(
            found = replies.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Discovery round finished"
        );
        Ok(replies)
    }

    /// Ask one component for its status
    pub async fn status_of(&self, id: &str, timeout: Duration) -> Result<StatusSnapshot> {
        let status_subject = subject::status(id);
        let reply = self
            .transport
            .request(&status_subject, Bytes::new(), timeout)
            .await?;

        serde_json::from_slice(&reply.payload).map_err(|e| NyftError::Protocol {
            subject: status_subject,
            reason: e.to_string(),
        })
    }

    /// Query every discovered component in turn; failures are logged and skipped
    pub async fn status_all(
        &self,
        replies: &[DiscoveryReply],
        timeout: Duration,
    ) -> Vec<StatusSnapshot> {
        let mut statuses = Vec::with_capacity(replies.len());

        for reply in replies {
            match self.status_of(&reply.component_id, timeout).await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(
                    component_id = %reply.component_id,
                    error = %e,
                    "Status query failed"
                ),
            }
        }

        statuses
    }

    /// Discovery round followed by status collection
    pub async fn survey(&self, config: &DiscoveryConfig) -> Result<Survey> {
        let started = Instant::now();
        let replies = self
            .discover(config.hard_deadline, config.idle_window)
            .await?;
        let discovery_time = started.elapsed();
        let statuses = self.status_all(&replies, config.status_timeout).await;

        Ok(Survey {
            replies,
            statuses,
            discovery_time,
        })
    }
}

fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();

        assert_eq!(
            deadline_after(now, Duration::from_millis(150)),
            now + Duration::from_millis(150)
        );
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
    }
}
