//! nyft-agent - driver agent
//!
//! The agent runs once per driver and:
//! - Connects to NATS, retrying forever
//! - Registers for discovery and status queries
//! - Offers itself for ride requests of its vehicle kind
//! - Optionally exposes Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nyft::component::CountingAllocator;
use nyft::config::parse_duration;
use nyft::metrics::PrometheusExporter;
use nyft::reconnect::ReconnectPolicy;
use nyft::transport::{NatsConfig, NatsTransport, DEFAULT_SERVERS};
use nyft::Component;
use nyft_agent::driver::{DEFAULT_VEHICLE_KIND, COMPONENT_KIND};
use nyft_agent::{AgentConfig, DriverAgent};
use tracing::{info, warn, Instrument};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[derive(Parser)]
#[command(name = "nyft-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "nyft driver agent", long_about = None)]
struct Args {
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_SERVERS, help = "Comma-separated NATS server URLs")]
    servers: String,

    #[arg(short = 't', long = "type", env = "NYFT_VEHICLE_TYPE", default_value = DEFAULT_VEHICLE_KIND, help = "Kind of vehicle")]
    kind: String,

    #[arg(long, env = "NYFT_MAX_DELAY", default_value = "1s", value_parser = parse_duration, help = "Upper bound of the random delay before offering a ride")]
    max_delay: Duration,

    #[arg(long, env = "NYFT_METRICS_ADDR", help = "Serve Prometheus metrics on this address")]
    metrics_addr: Option<SocketAddr>,

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
        info!("Starting nyft driver agent v{}", env!("CARGO_PKG_VERSION"));

        // Workers never give up reconnecting.
        let config = NatsConfig::new(args.servers, ReconnectPolicy::never_give_up());
        let transport = NatsTransport::connect(&config, &component.name())
            .await
            .context("Failed to connect to NATS")?;
        component.attach(Arc::new(transport));

        component
            .register()
            .await
            .context("Failed to register component")?;

        let agent = DriverAgent::new(
            component.clone(),
            AgentConfig {
                vehicle_kind: args.kind,
                max_delay: args.max_delay,
            },
        )?;
        agent
            .start()
            .await
            .context("Failed to subscribe to ride requests")?;

        if let Some(addr) = args.metrics_addr {
            let exporter = PrometheusExporter::new(component.registry().clone(), addr);
            let shutdown = component.shutdown_token();
            component.spawn(async move {
                if let Err(e) = exporter.serve(shutdown).await {
                    warn!(error = %e, "Metrics exporter stopped");
                }
            });
        }

        info!(kind = %agent.vehicle_kind(), "nyft-agent running. Press Ctrl+C to exit.");
        component.run_until_shutdown().await?;

        info!("nyft-agent stopped");
        Ok(())
    }
    .instrument(span)
    .await
}
