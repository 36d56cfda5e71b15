//! Scheduling introspection (spec.md §4.5): turns a Pod's `PodScheduled`
//! condition into a human-readable `waitingFor` string, and ranks all
//! cluster-wide `WaitingForGPU` services into a FIFO queue.
//!
//! Structured resource-request inspection is the primary signal; the
//! scheduler's free-text `message` is only a corroborating fallback, since
//! its wording isn't part of any stable API.

use crate::crd::inference_service::Priority;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

fn priority_weight(priority: Priority) -> i64 {
    match priority {
        Priority::Critical => 1_000_000,
        Priority::High => 100_000,
        Priority::Normal => 10_000,
        Priority::Low => 1_000,
        Priority::Batch => 100,
    }
}

/// Numeric rank used for both the phase-ordering gauge and queue sorting.
/// `priorityClassName`, if set, is opaque to the operator (resolved by the
/// scheduler itself) and does not change this value — see DESIGN.md.
pub fn effective_priority(priority: Option<Priority>) -> i64 {
    priority_weight(priority.unwrap_or_default())
}

/// The first GPU-ish resource name requested by any container in `pod`,
/// together with the requested quantity string. `None` means the pod
/// requests no GPU at all.
fn requested_gpu_resource(pod: &Pod) -> Option<(String, String)> {
    let spec = pod.spec.as_ref()?;
    for container in &spec.containers {
        let requests = container.resources.as_ref()?.requests.as_ref()?;
        for (key, quantity) in requests {
            if key.contains("gpu") {
                return Some((key.clone(), quantity.0.clone()));
            }
        }
    }
    None
}

/// `Some(description)` when the pod is unschedulable for GPU reasons,
/// `None` when it's schedulable or blocked on something else entirely.
pub fn waiting_for_gpu(pod: &Pod) -> Option<String> {
    let conditions = pod.status.as_ref()?.conditions.as_ref()?;
    let scheduled = conditions.iter().find(|c| c.type_ == "PodScheduled")?;
    if scheduled.status != "False" {
        return None;
    }

    if let Some((resource, quantity)) = requested_gpu_resource(pod) {
        return Some(format!("{resource}: {quantity}"));
    }

    // Fallback: the scheduler's message usually names the resource even
    // when the pod spec itself couldn't be inspected (e.g. a stale cache).
    let message = scheduled.message.as_deref().unwrap_or_default();
    if message.to_lowercase().contains("gpu") {
        return Some(message.to_owned());
    }
    None
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub name: String,
    pub effective_priority: i64,
    pub created: Time,
}

/// Assigns 1-based `queuePosition` to every `WaitingForGPU` service, ordered
/// by ascending creation time (pure FIFO). `effective_priority` is reported
/// on each service's status for observability only — it never reorders the
/// queue; any preemption implied by priority is left to the Kubernetes
/// scheduler's own `priorityClassName` handling. Returns `(name, position)`
/// pairs.
pub fn compute_queue_positions(mut entries: Vec<QueueEntry>) -> Vec<(String, i32)> {
    entries.sort_by(|a, b| a.created.0.cmp(&b.created.0).then_with(|| a.name.cmp(&b.name)));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| (e.name, i as i32 + 1))
        .collect()
}
