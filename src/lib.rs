//! nyft - ride matching over a publish/subscribe fabric
//!
//! Core building blocks shared by every nyft process:
//! - [`component`]: identity, liveness and status endpoints, lifecycle
//! - [`discovery`]: probe-and-collect discovery rounds with an adaptive deadline
//! - [`handler`]: dispatch table mapping subjects to handlers
//! - [`transport`]: messaging fabric abstraction (NATS and in-memory)

pub mod cli;
pub mod component;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod reconnect;
pub mod transport;

pub use component::Component;
pub use error::{NyftError, Result};
pub use nyft_common as common;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
