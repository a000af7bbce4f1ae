//! Driver agent for nyft
//!
//! Responsibilities:
//! - Register the agent for discovery and status queries
//! - Listen to ride requests broadcast on `drivers.rides`
//! - Offer its own id, after a random acceptance delay, when the requested
//!   vehicle kind matches exactly

pub mod driver;

pub use driver::{AgentConfig, DriverAgent};
