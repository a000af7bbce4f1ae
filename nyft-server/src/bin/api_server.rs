//! nyft-api-server - HTTP bridge
//!
//! Accepts `POST /v1/rides` and forwards each body as a find request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nyft::component::CountingAllocator;
use nyft::config::parse_duration;
use nyft::reconnect::ReconnectPolicy;
use nyft::transport::{NatsConfig, NatsTransport, Transport, DEFAULT_SERVERS};
use nyft::Component;
use nyft_server::{http, BridgeState};
use tracing::{info, warn, Instrument};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

const COMPONENT_KIND: &str = "api-server";

#[derive(Parser)]
#[command(name = "nyft-api-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "nyft HTTP bridge", long_about = None)]
struct Args {
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_SERVERS, help = "Comma-separated NATS server URLs")]
    servers: String,

    #[arg(short, long, env = "NYFT_LISTEN", default_value = "0.0.0.0:9090", help = "Network host:port to listen on")]
    listen: SocketAddr,

    #[arg(long, env = "NYFT_REQUEST_TIMEOUT", default_value = "3s", value_parser = parse_duration, help = "How long to wait for the dispatch service")]
    request_timeout: Duration,

    #[arg(short, long, env = "NYFT_VERBOSE", help = "Enable verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    nyft::logging::init(args.verbose)?;

    let component = Component::new(COMPONENT_KIND)?;
    let span = component.span().clone();

    async move {
        info!("Starting nyft API server v{}", env!("CARGO_PKG_VERSION"));

        let config = NatsConfig::new(args.servers, ReconnectPolicy::fail_fast());
        let transport: Arc<dyn Transport> = Arc::new(
            NatsTransport::connect(&config, &component.name())
                .await
                .context("Failed to connect to NATS")?,
        );
        component.attach(transport.clone());

        component
            .register()
            .await
            .context("Failed to register component")?;

        let listener = tokio::net::TcpListener::bind(args.listen)
            .await
            .with_context(|| format!("Failed to bind {}", args.listen))?;
        let state = BridgeState::new(transport, args.request_timeout);
        // Tracked, so a drain waits for in-flight HTTP requests before the
        // transport goes away.
        let shutdown = component.shutdown_token();
        component.spawn(async move {
            if let Err(e) = http::serve(listener, state, shutdown).await {
                warn!(error = %e, "HTTP bridge stopped");
            }
        });

        component.run_until_shutdown().await?;

        info!("nyft-api-server stopped");
        Ok(())
    }
    .instrument(span)
    .await
}
