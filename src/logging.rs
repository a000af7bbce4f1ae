//! Logging setup
//!
//! Binaries install one `tracing` subscriber at startup. Components never touch
//! global logging state afterwards: each one carries its own span (pid, kind, id)
//! and instruments its handler tasks with it.

use nyft_common::ComponentIdentity;
use tracing::{info_span, Span};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{NyftError, Result};

/// Install the process-wide subscriber. `RUST_LOG` takes precedence over
/// `verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| NyftError::Config(format!("failed to set tracing subscriber: {}", e)))
}

/// Span that prefixes every log line of a component
pub fn component_span(identity: &ComponentIdentity) -> Span {
    info_span!(
        "component",
        pid = std::process::id(),
        kind = %identity.kind,
        id = %identity.id
    )
}
