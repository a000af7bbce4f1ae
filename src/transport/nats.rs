//! NATS-backed transport

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_nats::Event;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Message, Subscription, Transport};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::reconnect::{connect_with_policy, ReconnectPolicy};
use crate::{NyftError, Result};

pub const DEFAULT_SERVERS: &str = "nats://127.0.0.1:4222";

#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Comma-separated server URLs
    pub servers: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl NatsConfig {
    pub fn new(servers: impl Into<String>, reconnect: ReconnectPolicy) -> Self {
        Self {
            servers: servers.into(),
            connect_timeout: Duration::from_secs(5),
            reconnect,
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVERS, ReconnectPolicy::fail_fast())
    }
}

impl From<async_nats::Message> for Message {
    fn from(msg: async_nats::Message) -> Self {
        Self {
            subject: msg.subject.to_string(),
            reply: msg.reply.map(|reply| reply.to_string()),
            payload: msg.payload,
        }
    }
}

pub struct NatsTransport {
    client: Mutex<Option<async_nats::Client>>,
    lifecycle: Arc<Lifecycle>,
    /// Cancelled by `stop_inbound`; every subscription unsubscribes on it
    inbound: CancellationToken,
}

impl NatsTransport {
    /// Connect using the initial-attempt policy from `config`. `name` labels the
    /// connection on the server.
    pub async fn connect(config: &NatsConfig, name: &str) -> Result<Self> {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.transition(ConnectionState::Connecting)?;

        let result = connect_with_policy(&config.reconnect, |attempt| {
            info!(servers = %config.servers, attempt, "Connecting to NATS");
            Self::connect_once(config, name, lifecycle.clone())
        })
        .await;

        let client = match result {
            Ok(client) => client,
            Err(e) => {
                let _ = lifecycle.transition(ConnectionState::Closed);
                return Err(e);
            }
        };

        lifecycle.transition(ConnectionState::Connected)?;
        info!(servers = %config.servers, name, "Connected to NATS");

        Ok(Self {
            client: Mutex::new(Some(client)),
            lifecycle,
            inbound: CancellationToken::new(),
        })
    }

    async fn connect_once(
        config: &NatsConfig,
        name: &str,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<async_nats::Client> {
        let backoff = config.reconnect.backoff;

        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connection_timeout(config.connect_timeout)
            .max_reconnects(config.reconnect.steady.limit())
            .reconnect_delay_callback(move |attempts| backoff.delay(attempts))
            .event_callback(move |event| {
                let lifecycle = lifecycle.clone();
                async move { on_event(&lifecycle, event) }
            })
            .connect(config.servers.as_str())
            .await?;

        Ok(client)
    }

    fn client(&self) -> Result<async_nats::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| NyftError::Transport("connection closed".to_string()))
    }
}

/// Yield messages until `stop` fires, then unsubscribe and yield whatever the
/// client had already buffered
fn stoppable(subscriber: async_nats::Subscriber, stop: CancellationToken) -> Subscription {
    futures::stream::unfold(
        (subscriber, stop, false),
        |(mut subscriber, stop, mut stopped)| async move {
            if !stopped {
                let next = tokio::select! {
                    biased;
                    msg = subscriber.next() => Some(msg),
                    _ = stop.cancelled() => None,
                };
                match next {
                    Some(msg) => return msg.map(|msg| (Message::from(msg), (subscriber, stop, false))),
                    None => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            warn!(error = %e, "Failed to unsubscribe");
                        }
                        debug!("Unsubscribed, flushing buffered messages");
                        stopped = true;
                    }
                }
            }

            subscriber
                .next()
                .await
                .map(|msg| (Message::from(msg), (subscriber, stop, stopped)))
        },
    )
    .boxed()
}

fn on_event(lifecycle: &Lifecycle, event: Event) {
    let next = match event {
        Event::Connected => {
            info!("Reconnected to NATS");
            Some(ConnectionState::Connected)
        }
        Event::Disconnected => {
            warn!("Disconnected from NATS");
            Some(ConnectionState::Reconnecting)
        }
        Event::Draining => Some(ConnectionState::Draining),
        Event::Closed => {
            warn!("NATS connection closed");
            Some(ConnectionState::Closed)
        }
        other => {
            error!(event = %other, "NATS error");
            None
        }
    };

    if let Some(next) = next {
        if let Err(e) = lifecycle.transition(next) {
            warn!(error = %e, "Ignoring connection event");
        }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client()?.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    async fn publish_request(&self, subject: &str, reply: &str, payload: Bytes) -> Result<()> {
        self.client()?
            .publish_with_reply(subject.to_string(), reply.to_string(), payload)
            .await?;
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        let client = self.client()?;

        match tokio::time::timeout(timeout, client.request(subject.to_string(), payload)).await {
            Ok(Ok(reply)) => Ok(reply.into()),
            Ok(Err(e)) if e.kind() == async_nats::RequestErrorKind::TimedOut => {
                Err(NyftError::Timeout {
                    subject: subject.to_string(),
                    after: timeout,
                })
            }
            Ok(Err(e)) => Err(NyftError::Transport(e.to_string())),
            Err(_) => Err(NyftError::Timeout {
                subject: subject.to_string(),
                after: timeout,
            }),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        let subscriber = self.client()?.subscribe(subject.to_string()).await?;
        Ok(stoppable(subscriber, self.inbound.child_token()))
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription> {
        let subscriber = self
            .client()?
            .queue_subscribe(subject.to_string(), group.to_string())
            .await?;
        Ok(stoppable(subscriber, self.inbound.child_token()))
    }

    fn new_inbox(&self) -> String {
        match self.client() {
            Ok(client) => client.new_inbox(),
            Err(_) => nyft_common::subject::inbox(),
        }
    }

    async fn flush(&self) -> Result<()> {
        self.client()?
            .flush()
            .await
            .map_err(|e| NyftError::Transport(e.to_string()))
    }

    async fn stop_inbound(&self) -> Result<()> {
        self.inbound.cancel();
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        let client = self.client()?;
        // Draining/Closed are also reported through the event callback; setting
        // them here keeps the state right if the callback lags.
        let _ = self.lifecycle.transition(ConnectionState::Draining);

        client
            .drain()
            .await
            .map_err(|e| NyftError::Transport(e.to_string()))?;

        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.lifecycle.transition(ConnectionState::Closed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last client handle tears the connection down.
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.lifecycle.transition(ConnectionState::Closed);
        Ok(())
    }

    fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }
}
