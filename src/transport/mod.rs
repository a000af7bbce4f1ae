//! Messaging fabric abstraction
//!
//! The core only needs a handful of primitives: fire-and-forget publish, publish with
//! an explicit reply subject, request/reply with a timeout (first reply wins),
//! plain and queue-group subscriptions, and connection lifecycle control.
//!
//! Two implementations exist:
//! - [`NatsTransport`]: production, backed by `async-nats`
//! - [`MemoryTransport`]: in-process bus with the same semantics, used by tests

mod memory;
mod nats;

pub use memory::{MemoryBus, MemoryTransport};
pub use nats::{NatsConfig, NatsTransport, DEFAULT_SERVERS};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::lifecycle::Lifecycle;
use crate::Result;

/// An inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }
}

/// Stream of messages for one subscription. Ends when the subscription is drained
/// or the connection closes.
pub type Subscription = BoxStream<'static, Message>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    async fn publish_request(&self, subject: &str, reply: &str, payload: Bytes) -> Result<()>;

    /// Publish with a one-shot reply subject and wait for the first reply.
    /// Later replies are discarded.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Subscribe as a member of `group`; each message reaches one member only
    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription>;

    fn new_inbox(&self) -> String;

    async fn flush(&self) -> Result<()>;

    /// Unsubscribe every subscription made through [`Transport::subscribe`] and
    /// [`Transport::queue_subscribe`]. Each stream still yields the messages
    /// already delivered to it, then ends. Replies to outbound requests keep
    /// flowing.
    async fn stop_inbound(&self) -> Result<()>;

    /// Stop inbound delivery, flush outbound buffers and close
    async fn drain(&self) -> Result<()>;

    /// Close without draining
    async fn close(&self) -> Result<()>;

    fn lifecycle(&self) -> Arc<Lifecycle>;
}

/// Match a subject against a pattern. `*` matches one token, `>` matches one or
/// more trailing tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
