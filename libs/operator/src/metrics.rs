//! Reconciler metrics: duration histogram with trace exemplars, a failure
//! counter keyed by error kind, and the phase gauge / time-to-ready
//! histogram called for in spec.md §4.3.

use crate::error::Error;

use kube::ResourceExt;
use opentelemetry::trace::TraceId;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{
    counter::Counter, exemplar::HistogramWithExemplars, family::Family, gauge::Gauge,
    histogram::Histogram,
};
use prometheus_client::registry::{Registry, Unit};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}

impl TryFrom<&TraceId> for TraceLabel {
    type Error = Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::InvalidTraceId)
        } else {
            Ok(Self { id: id.to_string() })
        }
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ControllerLabel {
    pub controller: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ErrorLabels {
    pub controller: String,
    pub instance: String,
    pub error: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct PhaseLabel {
    pub controller: String,
    pub phase: String,
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub reconcile: ReconcileMetrics,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("llmkube_reconcile");
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        Self {
            registry: Arc::new(registry),
            reconcile,
        }
    }
}

impl Metrics {
    pub fn ready_set(&self, controller: &str, ready: i64) {
        self.reconcile
            .ready
            .get_or_create(&ControllerLabel {
                controller: controller.to_owned(),
            })
            .set(ready);
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<ControllerLabel, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Family<ControllerLabel, HistogramWithExemplars<TraceLabel>>,
    pub phase: Family<PhaseLabel, Gauge>,
    pub time_to_ready: Family<ControllerLabel, Histogram>,
    pub ready: Family<ControllerLabel, Gauge>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::<ControllerLabel, Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: Family::<ControllerLabel, HistogramWithExemplars<TraceLabel>>::new_with_constructor(
                || HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10.].into_iter()),
            ),
            phase: Family::<PhaseLabel, Gauge>::default(),
            time_to_ready: Family::<ControllerLabel, Histogram>::new_with_constructor(|| {
                Histogram::new([1., 5., 15., 30., 60., 300., 900.].into_iter())
            }),
            ready: Family::<ControllerLabel, Gauge>::default(),
        }
    }
}

impl ReconcileMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        r.register(
            "phase",
            "current phase of each tracked resource kind (1 = active)",
            self.phase.clone(),
        );
        r.register_with_unit(
            "time_to_ready",
            "time from creation to first Ready observation",
            Unit::Seconds,
            self.time_to_ready.clone(),
        );
        r.register("ready", "controller readiness", self.ready.clone());
        self
    }

    pub fn set_failure<K: ResourceExt>(&self, controller: &str, obj: &K, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                controller: controller.to_owned(),
                instance: obj.name_any(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, controller: &str, trace_id: &TraceId) -> ReconcileMeasurer {
        let label = ControllerLabel {
            controller: controller.to_owned(),
        };
        self.runs.get_or_create(&label).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.get_or_create(&label).clone(),
        }
    }

    /// Sets the phase gauge for `controller`/`current` to 1 and every other
    /// phase in `all_phases` to 0, so `sum(llmkube_reconcile_phase)` across
    /// a controller always equals the number of reconciled objects.
    pub fn set_phase(&self, controller: &str, all_phases: &[&str], current: &str) {
        for phase in all_phases {
            let value = i64::from(*phase == current);
            self.phase
                .get_or_create(&PhaseLabel {
                    controller: controller.to_owned(),
                    phase: (*phase).to_owned(),
                })
                .set(value);
        }
    }

    pub fn observe_time_to_ready(&self, controller: &str, seconds: f64) {
        self.time_to_ready
            .get_or_create(&ControllerLabel {
                controller: controller.to_owned(),
            })
            .observe(seconds);
    }
}

/// Observes reconcile duration on drop, the way the teacher's measurer does,
/// so early-return `?` paths still record a duration.
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}
