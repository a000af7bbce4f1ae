//! In-process message bus
//!
//! Mirrors the NATS semantics the core relies on: wildcard subjects, queue groups
//! with one receiver per message (round-robin), request/reply where only the first
//! reply is observed, and drain that ends subscriptions once buffered messages are
//! consumed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use super::{subject_matches, Message, Subscription, Transport};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{NyftError, Result};

struct Entry {
    client: u64,
    pattern: String,
    group: Option<String>,
    /// One-shot inbox owned by `request`; survives `stop_inbound`
    reply_inbox: bool,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BusInner {
    subscriptions: DashMap<u64, Entry>,
    cursors: DashMap<(String, String), usize>,
    next_id: AtomicU64,
}

/// Shared bus; every [`MemoryTransport`] connected to it sees the same traffic
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to the bus
    pub fn connect(&self) -> MemoryTransport {
        let lifecycle = Arc::new(Lifecycle::new());
        // Fresh lifecycle, so both transitions are legal.
        let _ = lifecycle.transition(ConnectionState::Connecting);
        let _ = lifecycle.transition(ConnectionState::Connected);

        MemoryTransport {
            bus: self.clone(),
            client: self.next_id(),
            lifecycle,
        }
    }

    /// Number of live subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        self.prune();
        self.inner.subscriptions.len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(
        &self,
        client: u64,
        pattern: &str,
        group: Option<&str>,
        reply_inbox: bool,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscriptions.insert(
            self.next_id(),
            Entry {
                client,
                pattern: pattern.to_string(),
                group: group.map(str::to_string),
                reply_inbox,
                tx,
            },
        );
        UnboundedReceiverStream::new(rx).boxed()
    }

    fn prune(&self) {
        self.inner.subscriptions.retain(|_, entry| !entry.tx.is_closed());
    }

    fn deliver(&self, message: Message) {
        self.prune();

        let mut direct = Vec::new();
        let mut groups: HashMap<(String, String), Vec<(u64, mpsc::UnboundedSender<Message>)>> =
            HashMap::new();

        for entry in self.inner.subscriptions.iter() {
            if !subject_matches(&entry.pattern, &message.subject) {
                continue;
            }
            match &entry.group {
                None => direct.push(entry.tx.clone()),
                Some(group) => groups
                    .entry((entry.pattern.clone(), group.clone()))
                    .or_default()
                    .push((*entry.key(), entry.tx.clone())),
            }
        }

        trace!(
            subject = %message.subject,
            direct = direct.len(),
            groups = groups.len(),
            "delivering"
        );

        for tx in direct {
            let _ = tx.send(message.clone());
        }

        for (key, mut members) in groups {
            members.sort_by_key(|(sid, _)| *sid);
            let mut cursor = self.inner.cursors.entry(key).or_insert(0);
            let (_, tx) = &members[*cursor % members.len()];
            *cursor = cursor.wrapping_add(1);
            let _ = tx.send(message.clone());
        }
    }

    fn remove_client(&self, client: u64) {
        self.inner
            .subscriptions
            .retain(|_, entry| entry.client != client);
    }

    fn unsubscribe_client(&self, client: u64) {
        self.inner
            .subscriptions
            .retain(|_, entry| entry.client != client || entry.reply_inbox);
    }
}

/// One connection to a [`MemoryBus`]
pub struct MemoryTransport {
    bus: MemoryBus,
    client: u64,
    lifecycle: Arc<Lifecycle>,
}

impl MemoryTransport {
    /// Drop the connection as if the fabric closed it for good
    pub fn sever(&self) {
        self.bus.remove_client(self.client);
        let _ = self.lifecycle.transition(ConnectionState::Closed);
    }

    fn ensure_can_publish(&self) -> Result<()> {
        match self.lifecycle.state() {
            ConnectionState::Connected
            | ConnectionState::Reconnecting
            | ConnectionState::Draining => Ok(()),
            state => Err(NyftError::Transport(format!("connection is {}", state))),
        }
    }

    fn ensure_can_subscribe(&self) -> Result<()> {
        match self.lifecycle.state() {
            ConnectionState::Connected
            | ConnectionState::Reconnecting
            | ConnectionState::Draining => Ok(()),
            state => Err(NyftError::Transport(format!("connection is {}", state))),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_can_publish()?;
        self.bus.deliver(Message::new(subject, payload));
        Ok(())
    }

    async fn publish_request(&self, subject: &str, reply: &str, payload: Bytes) -> Result<()> {
        self.ensure_can_publish()?;
        self.bus.deliver(Message {
            subject: subject.to_string(),
            reply: Some(reply.to_string()),
            payload,
        });
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        let inbox = self.new_inbox();
        self.ensure_can_subscribe()?;
        let mut replies = self.bus.register(self.client, &inbox, None, true);
        self.publish_request(subject, &inbox, payload).await?;

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(NyftError::Transport(
                "connection closed while awaiting reply".to_string(),
            )),
            Err(_) => Err(NyftError::Timeout {
                subject: subject.to_string(),
                after: timeout,
            }),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_can_subscribe()?;
        Ok(self.bus.register(self.client, subject, None, false))
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription> {
        self.ensure_can_subscribe()?;
        Ok(self.bus.register(self.client, subject, Some(group), false))
    }

    fn new_inbox(&self) -> String {
        nyft_common::subject::inbox()
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_can_publish()
    }

    async fn stop_inbound(&self) -> Result<()> {
        self.bus.unsubscribe_client(self.client);
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        if self.lifecycle.state().is_closed() {
            return Ok(());
        }
        self.lifecycle.transition(ConnectionState::Draining)?;
        self.bus.remove_client(self.client);
        self.lifecycle.transition(ConnectionState::Closed)
    }

    async fn close(&self) -> Result<()> {
        self.bus.remove_client(self.client);
        if self.lifecycle.state().is_closed() {
            return Ok(());
        }
        self.lifecycle.transition(ConnectionState::Closed)
    }

    fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_plain_subscriber() {
        let bus = MemoryBus::new();
        let a = bus.connect();
        let b = bus.connect();

        let mut sub_a = a.subscribe("drivers.rides").await.unwrap();
        let mut sub_b = b.subscribe("drivers.*").await.unwrap();

        a.publish("drivers.rides", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(sub_a.next().await.unwrap().payload, "hello");
        assert_eq!(sub_b.next().await.unwrap().payload, "hello");
    }

    #[tokio::test]
    async fn test_queue_group_delivers_to_one_member() {
        let bus = MemoryBus::new();
        let client = bus.connect();
        let first = bus.connect();
        let second = bus.connect();

        let mut sub_first = first.queue_subscribe("drivers.find", "manager").await.unwrap();
        let mut sub_second = second
            .queue_subscribe("drivers.find", "manager")
            .await
            .unwrap();

        for _ in 0..4 {
            client
                .publish("drivers.find", Bytes::from_static(b"{}"))
                .await
                .unwrap();
        }
        first.close().await.unwrap();
        second.close().await.unwrap();

        let mut received = 0;
        while sub_first.next().await.is_some() {
            received += 1;
        }
        let mut received_second = 0;
        while sub_second.next().await.is_some() {
            received_second += 1;
        }

        assert_eq!(received + received_second, 4);
        assert_eq!(received, 2);
        assert_eq!(received_second, 2);
    }

    #[tokio::test]
    async fn test_request_returns_first_reply() {
        let bus = MemoryBus::new();
        let requester = bus.connect();
        let responder = bus.connect();

        let mut probes = responder.subscribe("svc.echo").await.unwrap();
        let responder_task = tokio::spawn(async move {
            let msg = probes.next().await.unwrap();
            let reply = msg.reply.unwrap();
            responder
                .publish(&reply, Bytes::from_static(b"first"))
                .await
                .unwrap();
            responder
                .publish(&reply, Bytes::from_static(b"second"))
                .await
                .unwrap();
        });

        let reply = requester
            .request("svc.echo", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, "first");
        responder_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_without_responders() {
        let bus = MemoryBus::new();
        let requester = bus.connect();

        let started = tokio::time::Instant::now();
        let err = requester
            .request("nobody.home", Bytes::new(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(2));
        // The one-shot inbox is gone once the request returns.
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_ends_subscriptions_after_buffered_messages() {
        let bus = MemoryBus::new();
        let publisher = bus.connect();
        let subscriber = bus.connect();

        let mut sub = subscriber.subscribe("events").await.unwrap();
        publisher.publish("events", Bytes::from_static(b"1")).await.unwrap();
        subscriber.drain().await.unwrap();
        publisher.publish("events", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, "1");
        assert!(sub.next().await.is_none());
        assert_eq!(subscriber.lifecycle().state(), ConnectionState::Closed);
        assert!(subscriber.publish("events", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_inbound_keeps_buffered_messages_and_requests() {
        let bus = MemoryBus::new();
        let publisher = bus.connect();
        let worker = bus.connect();
        let responder = bus.connect();

        let mut sub = worker.subscribe("events").await.unwrap();
        let mut echo = responder.subscribe("svc.echo").await.unwrap();
        publisher.publish("events", Bytes::from_static(b"1")).await.unwrap();

        worker.stop_inbound().await.unwrap();
        publisher.publish("events", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, "1");
        assert!(sub.next().await.is_none());

        // Outbound requests still get their replies.
        let responder_task = tokio::spawn(async move {
            let msg = echo.next().await.unwrap();
            responder
                .publish(&msg.reply.unwrap(), Bytes::from_static(b"pong"))
                .await
                .unwrap();
        });
        let reply = worker
            .request("svc.echo", Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, "pong");
        responder_task.await.unwrap();
    }
}
