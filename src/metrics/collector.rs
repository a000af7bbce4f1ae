use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::Result;

/// Create an integer counter and register it with `registry`
pub fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Create a labelled counter family and register it with `registry`
pub fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Counters for the identity & health endpoints every component serves
#[derive(Clone)]
pub struct HealthMetrics {
    pub probes_answered: IntCounter,
    pub status_answered: IntCounter,
    pub ignored: IntCounter,
}

impl HealthMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            probes_answered: counter(
                registry,
                "nyft_discovery_probes_answered_total",
                "Discovery probes answered with this component's id",
            )?,
            status_answered: counter(
                registry,
                "nyft_status_queries_answered_total",
                "Status queries answered with a snapshot",
            )?,
            ignored: counter(
                registry,
                "nyft_messages_ignored_total",
                "Health messages ignored because they carried no reply inbox",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics_register_once_per_registry() {
        let registry = Registry::new();
        let metrics = HealthMetrics::register(&registry).unwrap();
        metrics.probes_answered.inc();

        assert_eq!(metrics.probes_answered.get(), 1);
        assert!(HealthMetrics::register(&registry).is_err());
        assert!(HealthMetrics::register(&Registry::new()).is_ok());
    }
}
