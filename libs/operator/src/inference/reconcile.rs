//! The InferenceService reconciler (spec.md §4.3): resolves the referenced
//! `Model`, materializes a Deployment/Service pair (or, for a Metal
//! accelerator, only the Service — see `deployment.rs`), and reports
//! readiness, scheduling status, and GPU queue position.

use crate::cache;
use crate::conditions::set_condition;
use crate::controller::Context;
use crate::crd::inference_service::{
    InferenceService, InferenceServicePhase, InferenceServiceStatus, CONDITION_AVAILABLE,
    CONDITION_DEGRADED, CONDITION_GPU_AVAILABLE, CONDITION_PROGRESSING,
};
use crate::crd::model::{Accelerator, Model, ModelPhase};
use crate::error::{Error, Result};
use crate::inference::deployment::{build_deployment, build_service, endpoint_url};
use crate::inference::scheduling::{compute_queue_positions, effective_priority, waiting_for_gpu, QueueEntry};
use crate::model::reconcile::is_local_source;
use crate::telemetry;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{field, info, instrument, warn, Span};

pub const CONTROLLER_ID: &str = "inferenceservice";
pub const ALL_PHASES: &[&str] = &[
    "pending",
    "creating",
    "progressing",
    "waitingforgpu",
    "ready",
    "failed",
];

const RETRY_AFTER: Duration = Duration::from_secs(30);
const POLL_WHILE_PENDING: Duration = Duration::from_secs(15);
const RESYNC_READY: Duration = Duration::from_secs(60);
const APPLY_MANAGER: &str = "llmkube-controller";

async fn patch_status(api: &Api<InferenceService>, name: &str, status: InferenceServiceStatus) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn ensure_deployment(client: kube::Client, namespace: &str, deployment: &Deployment) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let name = deployment.name_any();
    api.patch(
        &name,
        &PatchParams::apply(APPLY_MANAGER).force(),
        &Patch::Apply(deployment),
    )
    .await
    .map_err(|e| Error::DeploymentCreateFailed(e.to_string()))?;
    Ok(())
}

async fn ensure_service(client: kube::Client, namespace: &str, service: &Service) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let name = service.name_any();
    api.patch(
        &name,
        &PatchParams::apply(APPLY_MANAGER).force(),
        &Patch::Apply(service),
    )
    .await
    .map_err(|e| Error::ServiceCreateFailed(e.to_string()))?;
    Ok(())
}

fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

async fn owned_pods(client: kube::Client, namespace: &str, name: &str) -> Result<Vec<Pod>> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let lp = ListParams::default().labels(&format!("app.kubernetes.io/instance={name}"));
    Ok(api.list(&lp).await?.items)
}

/// Ranks `name`'s position among every `WaitingForGPU` InferenceService in
/// the cluster, including itself.
async fn queue_position(client: kube::Client, name: &str, priority: i64, created: Time) -> Result<i32> {
    let api: Api<InferenceService> = Api::all(client);
    let all = api.list(&ListParams::default()).await?;
    let mut entries: Vec<QueueEntry> = all
        .items
        .iter()
        .filter(|s| {
            matches!(
                s.status.as_ref().and_then(|st| st.phase),
                Some(InferenceServicePhase::WaitingForGPU)
            )
        })
        .map(|s| QueueEntry {
            name: s.name_any(),
            effective_priority: s.status.as_ref().map(|st| st.effective_priority).unwrap_or(priority),
            created: s.creation_timestamp().unwrap_or_else(|| created.clone()),
        })
        .collect();

    if !entries.iter().any(|e| e.name == name) {
        entries.push(QueueEntry {
            name: name.to_owned(),
            effective_priority: priority,
            created,
        });
    }

    let positions = compute_queue_positions(entries);
    Ok(positions
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, p)| p)
        .unwrap_or(0))
}

#[instrument(skip(ctx, svc), fields(trace_id))]
pub async fn reconcile_inference_service(svc: Arc<InferenceService>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(CONTROLLER_ID, &trace_id);

    let namespace = svc
        .namespace()
        .ok_or_else(|| Error::UserInputError("InferenceService must be namespaced".to_owned()))?;
    let name = svc.name_any();
    let generation = svc.meta().generation.unwrap_or_default();
    let api: Api<InferenceService> = Api::namespaced(ctx.client.clone(), &namespace);
    let priority = effective_priority(svc.spec.priority);

    let model_api: Api<Model> = Api::namespaced(ctx.client.clone(), &namespace);
    let model = model_api.get_opt(&svc.spec.model_ref).await?;

    let model = match model {
        None => {
            let mut status = svc.status.clone().unwrap_or_default();
            status.phase = Some(InferenceServicePhase::Pending);
            status.model_ready = false;
            status.effective_priority = priority;
            set_condition(
                &mut status.conditions,
                CONDITION_AVAILABLE,
                false,
                "ModelNotFound",
                &format!("Model {:?} not found", svc.spec.model_ref),
                generation,
            );
            patch_status(&api, &name, status).await?;
            ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "pending");
            return Ok(Action::requeue(POLL_WHILE_PENDING));
        }
        Some(m) => m,
    };

    if !matches!(model.status.as_ref().and_then(|s| s.phase), Some(ModelPhase::Ready)) {
        let mut status = svc.status.clone().unwrap_or_default();
        status.phase = Some(InferenceServicePhase::Pending);
        status.model_ready = false;
        status.effective_priority = priority;
        set_condition(
            &mut status.conditions,
            CONDITION_AVAILABLE,
            false,
            "ModelNotReady",
            &format!("Model {:?} is not Ready yet", svc.spec.model_ref),
            generation,
        );
        patch_status(&api, &name, status).await?;
        ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "pending");
        return Ok(Action::requeue(POLL_WHILE_PENDING));
    }

    let accelerator = model
        .spec
        .hardware
        .as_ref()
        .map(|h| h.accelerator)
        .unwrap_or_default();
    let desired_replicas = svc.spec.replicas_or_default();

    let mut status = svc.status.clone().unwrap_or_default();
    status.model_ready = true;
    status.desired_replicas = desired_replicas;
    status.effective_priority = priority;

    let result = if accelerator == Accelerator::Metal {
        reconcile_metal(&svc, &ctx, &mut status, desired_replicas).await
    } else {
        reconcile_containerized(&svc, &model, &ctx, &namespace, &name, &mut status, desired_replicas, priority).await
    };

    match result {
        Ok(phase) => {
            status.phase = Some(phase);
            let phase_label = phase_label(phase);
            set_condition(
                &mut status.conditions,
                CONDITION_AVAILABLE,
                phase == InferenceServicePhase::Ready,
                phase_label,
                &format!("InferenceService is {phase_label}"),
                generation,
            );
            set_condition(
                &mut status.conditions,
                CONDITION_PROGRESSING,
                !matches!(phase, InferenceServicePhase::Ready | InferenceServicePhase::Failed),
                phase_label,
                &format!("InferenceService is {phase_label}"),
                generation,
            );
            patch_status(&api, &name, status).await?;
            ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, phase_label);
            ctx.metrics.ready_set(CONTROLLER_ID, i64::from(phase == InferenceServicePhase::Ready));
            let requeue = match phase {
                InferenceServicePhase::Ready => RESYNC_READY,
                InferenceServicePhase::Failed => RETRY_AFTER,
                _ => POLL_WHILE_PENDING,
            };
            Ok(Action::requeue(requeue))
        }
        Err(e) => {
            warn!(msg = "inference service reconcile failed", name = %name, error = %e);
            ctx.metrics.reconcile.set_failure(CONTROLLER_ID, &*svc, &e);
            status.phase = Some(InferenceServicePhase::Failed);
            set_condition(
                &mut status.conditions,
                CONDITION_DEGRADED,
                true,
                "ReconcileFailed",
                &e.to_string(),
                generation,
            );
            patch_status(&api, &name, status).await?;
            ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "failed");
            Ok(Action::requeue(RETRY_AFTER))
        }
    }
}

fn phase_label(phase: InferenceServicePhase) -> &'static str {
    match phase {
        InferenceServicePhase::Pending => "pending",
        InferenceServicePhase::Creating => "creating",
        InferenceServicePhase::Progressing => "progressing",
        InferenceServicePhase::WaitingForGPU => "waitingforgpu",
        InferenceServicePhase::Ready => "ready",
        InferenceServicePhase::Failed => "failed",
    }
}

/// The Metal path never creates a Deployment: the runtime process lives on
/// the host, managed by the Metal agent (spec.md §4.6). The operator's only
/// cluster-side responsibility is the selector-less Service; readiness of
/// the actual process is outside what the Kubernetes API can observe, so it
/// is reported optimistically once the Model is ready (see DESIGN.md).
async fn reconcile_metal(
    svc: &InferenceService,
    ctx: &Context,
    status: &mut InferenceServiceStatus,
    desired_replicas: i32,
) -> Result<InferenceServicePhase> {
    let service = build_service(svc, true);
    ensure_service(ctx.client.clone(), &svc.namespace().unwrap_or_default(), &service).await?;

    status.ready_replicas = desired_replicas;
    status.endpoint = Some(endpoint_url(svc));
    status.scheduling_status = Some("metal".to_owned());
    status.scheduling_message = None;
    status.waiting_for = None;
    status.queue_position = 0;
    Ok(InferenceServicePhase::Ready)
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_containerized(
    svc: &InferenceService,
    model: &Model,
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &mut InferenceServiceStatus,
    desired_replicas: i32,
    priority: i64,
) -> Result<InferenceServicePhase> {
    if !ctx.config.cache_enabled && is_local_source(&model.spec.source) {
        return Err(Error::LocalSourceRequiresCache);
    }
    if ctx.config.cache_enabled {
        cache::ensure_cache_pvc(ctx.client.clone(), namespace, &ctx.config).await?;
    }

    let model_path = model
        .status
        .as_ref()
        .and_then(|s| s.path.clone())
        .ok_or_else(|| Error::ModelNotReady(svc.spec.model_ref.clone()))?;

    let deployment = build_deployment(svc, model, &model_path, &ctx.config);
    let service = build_service(svc, false);
    ensure_deployment(ctx.client.clone(), namespace, &deployment).await?;
    ensure_service(ctx.client.clone(), namespace, &service).await?;

    let pods = owned_pods(ctx.client.clone(), namespace, name).await?;
    let ready_replicas = pods.iter().filter(|p| pod_ready(p)).count() as i32;
    status.ready_replicas = ready_replicas;

    if ready_replicas >= desired_replicas && desired_replicas > 0 {
        status.endpoint = Some(endpoint_url(svc));
        status.scheduling_status = Some("scheduled".to_owned());
        status.scheduling_message = None;
        status.waiting_for = None;
        status.queue_position = 0;
        set_condition(&mut status.conditions, CONDITION_GPU_AVAILABLE, true, "Ready", "pods scheduled", 0);
        return Ok(InferenceServicePhase::Ready);
    }

    if ready_replicas > 0 {
        status.endpoint = None;
        status.scheduling_status = Some("progressing".to_owned());
        status.scheduling_message = None;
        status.waiting_for = None;
        status.queue_position = 0;
        return Ok(InferenceServicePhase::Progressing);
    }

    let waiting = pods.iter().find_map(waiting_for_gpu);
    match waiting {
        Some(reason) => {
            let created = svc
                .creation_timestamp()
                .unwrap_or_else(|| Time(chrono::Utc::now()));
            let position = queue_position(ctx.client.clone(), name, priority, created).await?;
            status.endpoint = None;
            status.scheduling_status = Some("waiting".to_owned());
            status.scheduling_message = Some(reason.clone());
            status.waiting_for = Some(reason);
            status.queue_position = position;
            set_condition(&mut status.conditions, CONDITION_GPU_AVAILABLE, false, "InsufficientGPU", "waiting for GPU capacity", 0);
            info!(msg = "inference service waiting for GPU", name = %name, position);
            Ok(InferenceServicePhase::WaitingForGPU)
        }
        None => {
            status.endpoint = None;
            status.scheduling_status = Some("creating".to_owned());
            status.scheduling_message = None;
            status.waiting_for = None;
            status.queue_position = 0;
            Ok(InferenceServicePhase::Creating)
        }
    }
}

pub fn error_policy(svc: Arc<InferenceService>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(msg = "inference service reconcile failed", name = %svc.name_any(), %error);
    ctx.metrics.reconcile.set_failure(CONTROLLER_ID, &*svc, error);
    Action::requeue(RETRY_AFTER)
}
