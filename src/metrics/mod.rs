pub mod collector;
pub mod exporter;

pub use collector::{counter, counter_vec, HealthMetrics};
pub use exporter::PrometheusExporter;
