//! nyft-service - dispatch service
//!
//! Joins the `manager` queue group on `drivers.find`, so any number of replicas
//! share the find traffic. Each request is fanned out to the driver agents and
//! answered with the first offer.

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
use nyft_server::dispatch::COMPONENT_KIND;
use nyft_server::{DispatchConfig, DispatchService};
use tracing::{info, warn, Instrument};

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[derive(Parser)]
#[command(name = "nyft-service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "nyft dispatch service", long_about = None)]
struct Args {
    #[arg(short, long, env = "NATS_URL", default_value = DEFAULT_SERVERS, help = "Comma-separated NATS server URLs")]
    servers: String,

    #[arg(long, env = "NYFT_FIND_TIMEOUT", default_value = "2s", value_parser = parse_duration, help = "How long to wait for a driver to reply")]
    find_timeout: Duration,

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
        info!("Starting nyft dispatch service v{}", env!("CARGO_PKG_VERSION"));

        let config = NatsConfig::new(args.servers, ReconnectPolicy::fail_fast());
        let transport = NatsTransport::connect(&config, &component.name())
            .await
            .context("Failed to connect to NATS")?;
        component.attach(Arc::new(transport));

        component
            .register()
            .await
            .context("Failed to register component")?;

        let service = DispatchService::new(
            component.clone(),
            DispatchConfig {
                find_timeout: args.find_timeout,
            },
        )?;
        service
            .start()
            .await
            .context("Failed to subscribe to find requests")?;

        if let Some(addr) = args.metrics_addr {
            let exporter = PrometheusExporter::new(component.registry().clone(), addr);
            let shutdown = component.shutdown_token();
            component.spawn(async move {
                if let Err(e) = exporter.serve(shutdown).await {
                    warn!(error = %e, "Metrics exporter stopped");
                }
            });
        }

        info!("nyft-service running. Press Ctrl+C to exit.");
        component.run_until_shutdown().await?;

        info!("nyft-service stopped");
        Ok(())
    }
    .instrument(span)
    .await
}
