//! Minimal process-table metrics, shaped like `llmkube_operator::metrics`
//! but scaled down to what a single host agent actually needs: how many
//! runtimes are currently managed and how event handling is failing.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ErrorLabel {
    pub error: String,
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub managed_processes: Gauge,
    pub event_failures: Family<ErrorLabel, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("llmkube_metal_agent");
        let managed_processes = Gauge::default();
        let event_failures = Family::<ErrorLabel, Counter>::default();

        registry.register(
            "managed_processes",
            "runtime processes currently owned by this agent",
            managed_processes.clone(),
        );
        registry.register(
            "event_failures",
            "watcher events that failed to apply",
            event_failures.clone(),
        );

        Self {
            registry: Arc::new(registry),
            managed_processes,
            event_failures,
        }
    }
}

impl Metrics {
    pub fn record_failure(&self, error: &crate::error::Error) {
        self.event_failures
            .get_or_create(&ErrorLabel { error: error.metric_label() })
            .inc();
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry).unwrap();
        buffer
    }
}
