use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ConnectionState;

#[derive(Error, Debug)]
pub enum NyftError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request on {subject} timed out after {after:?}")]
    Timeout { subject: String, after: Duration },

    #[error("Malformed payload on {subject}: {reason}")]
    Protocol { subject: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Component has no transport attached")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NyftError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<async_nats::ConnectError> for NyftError {
    fn from(e: async_nats::ConnectError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<async_nats::PublishError> for NyftError {
    fn from(e: async_nats::PublishError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<async_nats::SubscribeError> for NyftError {
    fn from(e: async_nats::SubscribeError) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NyftError>;
