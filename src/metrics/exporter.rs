use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{NyftError, Result};

/// Serves a component's registry on `GET /metrics`
pub struct PrometheusExporter {
    registry: Registry,
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(registry: Registry, addr: SocketAddr) -> Self {
        Self { registry, addr }
    }

    pub fn render(&self) -> Result<String> {
        render(&self.registry)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Starting Prometheus exporter on {}", self.addr);

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.registry);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

pub fn render(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| NyftError::Config(e.to_string()))
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::counter;

    #[test]
    fn test_render_includes_registered_counters() {
        let registry = Registry::new();
        let finds = counter(&registry, "nyft_test_total", "Test counter").unwrap();
        finds.inc_by(3);

        let exporter = PrometheusExporter::new(registry, "127.0.0.1:0".parse().unwrap());
        let text = exporter.render().unwrap();

        assert!(text.contains("# TYPE nyft_test_total counter"));
        assert!(text.contains("nyft_test_total 3"));
    }
}
