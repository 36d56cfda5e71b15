//! Builds the Deployment and Service subresources owned by an
//! `InferenceService` (spec.md §4.3). Pure construction helpers only; no
//! Kubernetes API calls live here.

use crate::cache::CACHE_PVC_NAME;
use crate::controller::OperatorConfig;
use crate::crd::inference_service::{Exposure, InferenceService, InferenceServiceSpec};
use crate::crd::model::{Accelerator, Model};
use crate::inference::args;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Service, ServicePort, ServiceSpec, Toleration,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

const DEFAULT_IMAGE_CPU: &str = "ghcr.io/ggml-org/llama.cpp:server";
const DEFAULT_IMAGE_CUDA: &str = "ghcr.io/ggml-org/llama.cpp:server-cuda";
const CONTAINER_PORT: u16 = 8080;

/// Kubernetes `Service` names must be valid RFC 1035 labels — lowercase
/// alphanumerics and `-`, no dots — unlike Deployment names, which accept
/// the looser RFC 1123 subdomain form. An `InferenceService` named
/// `llama-3.1-8b` is legal, but its Service object needs `.` mapped to `-`
/// or the apply is rejected outright (spec.md §4.3 steps 6/8, Scenario 4).
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    while out.starts_with('-') {
        out.remove(0);
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() || !out.chars().next().unwrap().is_ascii_alphabetic() {
        out = format!("svc-{out}");
    }
    out
}

pub fn labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_owned(), "llmkube".to_owned());
    labels.insert(
        "app.kubernetes.io/instance".to_owned(),
        name.to_owned(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_owned(),
        "llmkube-controller".to_owned(),
    );
    labels
}

fn owner_ref(svc: &InferenceService) -> Option<OwnerReference> {
    svc.controller_owner_ref(&())
}

fn default_image(model: &Model) -> &'static str {
    match model.spec.hardware.as_ref().map(|h| h.accelerator) {
        Some(Accelerator::Cuda) => DEFAULT_IMAGE_CUDA,
        _ => DEFAULT_IMAGE_CPU,
    }
}

fn resource_requirements(spec: &InferenceServiceSpec, gpu_count: i32) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    if let Some(r) = &spec.resources {
        if let Some(cpu) = &r.cpu {
            requests.insert("cpu".to_owned(), Quantity(cpu.clone()));
            limits.insert("cpu".to_owned(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &r.memory {
            requests.insert("memory".to_owned(), Quantity(memory.clone()));
            limits.insert("memory".to_owned(), Quantity(memory.clone()));
        }
    }
    if gpu_count > 0 {
        limits.insert(
            "nvidia.com/gpu".to_owned(),
            Quantity(gpu_count.to_string()),
        );
    }

    ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        claims: None,
    }
}

fn gpu_toleration() -> Toleration {
    Toleration {
        key: Some("nvidia.com/gpu".to_owned()),
        operator: Some("Exists".to_owned()),
        effect: Some("NoSchedule".to_owned()),
        ..Default::default()
    }
}

/// Volume strategy (spec.md §4.3, §4.4 "Volumes"): the cache PVC when caching
/// is enabled, otherwise none — a local, uncached source is rejected earlier
/// in `reconcile.rs` before this function is ever called.
fn cache_volume(config: &OperatorConfig) -> (Vec<Volume>, Vec<VolumeMount>) {
    if !config.cache_enabled {
        return (Vec::new(), Vec::new());
    }
    let volumes = vec![Volume {
        name: "model-cache".to_owned(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: CACHE_PVC_NAME.to_owned(),
            read_only: Some(true),
        }),
        ..Default::default()
    }];
    let mounts = vec![VolumeMount {
        name: "model-cache".to_owned(),
        mount_path: config.cache_root.clone(),
        read_only: Some(true),
        ..Default::default()
    }];
    (volumes, mounts)
}

fn ca_volume(config: &OperatorConfig) -> (Option<Volume>, Option<VolumeMount>) {
    let configmap = match config.custom_ca_configmap.as_ref() {
        Some(configmap) => configmap,
        None => return (None, None),
    };
    let volume = Volume {
        name: "custom-ca".to_owned(),
        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
            name: configmap.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: "custom-ca".to_owned(),
        mount_path: "/etc/ssl/certs/custom-ca".to_owned(),
        read_only: Some(true),
        ..Default::default()
    };
    (Some(volume), Some(mount))
}

/// Builds (or rebuilds) the Deployment for a containerized accelerator.
/// Never called for `Accelerator::Metal`, which has no Deployment at all
/// (spec.md §4.6).
pub fn build_deployment(
    svc: &InferenceService,
    model: &Model,
    model_path: &str,
    config: &OperatorConfig,
) -> Deployment {
    let name = svc.name_any();
    let namespace = svc.namespace();
    let selector = labels(&name);

    let image = svc
        .spec
        .image
        .clone()
        .unwrap_or_else(|| default_image(model).to_owned());

    let gpu_count = args::effective_gpu_count(model, &svc.spec);
    let port = svc.spec.endpoint.as_ref().and_then(|e| e.port).unwrap_or(CONTAINER_PORT);
    let cli_args = args::build_args(model_path, port, model, &svc.spec);

    let (mut volumes, mut mounts) = cache_volume(config);
    if let (Some(v), Some(m)) = ca_volume(config) {
        volumes.push(v);
        mounts.push(m);
    }

    let mut tolerations = svc.spec.tolerations.clone();
    if gpu_count > 0 {
        tolerations.push(gpu_toleration());
    }

    let probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/health".to_owned()),
            port: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(port as i32),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    };

    let container = Container {
        name: "llama-server".to_owned(),
        image: Some(image),
        args: Some(cli_args),
        ports: Some(vec![ContainerPort {
            container_port: port as i32,
            name: Some("http".to_owned()),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "LLMKUBE_MODEL_REF".to_owned(),
            value: Some(svc.spec.model_ref.clone()),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(&svc.spec, gpu_count)),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        liveness_probe: Some(probe.clone()),
        readiness_probe: Some(probe),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: namespace.clone(),
            labels: Some(selector.clone()),
            owner_references: owner_ref(svc).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(svc.spec.replicas_or_default()),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    tolerations: (!tolerations.is_empty()).then_some(tolerations),
                    node_selector: (!svc.spec.node_selector.is_empty())
                        .then(|| svc.spec.node_selector.clone()),
                    priority_class_name: svc.spec.priority_class_name.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the `ClusterIP`/`NodePort`/`LoadBalancer` Service fronting the
/// Deployment's pods. Metal-backed services reuse the same shape but point
/// at the manually managed Endpoints the host agent registers instead of a
/// pod selector (`crate::metal_agent::registry`, out of this crate).
pub fn build_service(svc: &InferenceService, metal: bool) -> Service {
    let name = svc.name_any();
    let namespace = svc.namespace();
    let selector = labels(&name);
    let port = svc.spec.endpoint.as_ref().and_then(|e| e.port).unwrap_or(CONTAINER_PORT);
    let exposure = svc
        .spec
        .endpoint
        .as_ref()
        .and_then(|e| e.exposure)
        .unwrap_or_default();

    Service {
        metadata: ObjectMeta {
            name: Some(sanitize_name(&name)),
            namespace: namespace.clone(),
            labels: Some(selector.clone()),
            owner_references: owner_ref(svc).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: (!metal).then(|| selector),
            type_: Some(
                match exposure {
                    Exposure::ClusterIP => "ClusterIP",
                    Exposure::NodePort => "NodePort",
                    Exposure::LoadBalancer => "LoadBalancer",
                }
                .to_owned(),
            ),
            ports: Some(vec![ServicePort {
                port: port as i32,
                target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(
                    port as i32,
                )),
                name: Some("http".to_owned()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `http://<service>.<namespace>.svc.cluster.local:<port><path>`, per
/// spec.md §3 "endpoint composition".
pub fn endpoint_url(svc: &InferenceService) -> String {
    let name = svc.name_any();
    let namespace = svc.namespace().unwrap_or_default();
    let port = svc.spec.endpoint.as_ref().and_then(|e| e.port).unwrap_or(CONTAINER_PORT);
    let path = svc
        .spec
        .endpoint
        .as_ref()
        .and_then(|e| e.path.clone())
        .unwrap_or_else(|| "/v1".to_owned());
    let name = sanitize_name(&name);
    format!("http://{name}.{namespace}.svc.cluster.local:{port}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::inference_service::InferenceServiceSpec;
    use crate::crd::model::ModelSpec;

    fn svc() -> InferenceService {
        let mut s = InferenceService::new(
            "chat",
            InferenceServiceSpec {
                model_ref: "llama-3".to_owned(),
                ..Default::default()
            },
        );
        s.meta_mut().namespace = Some("default".into());
        s
    }

    fn model() -> Model {
        Model::new("llama-3", ModelSpec::default())
    }

    #[test]
    fn deployment_selector_matches_template_labels() {
        let config = OperatorConfig::default();
        let deployment = build_deployment(&svc(), &model(), "/cache/x/model.gguf", &config);
        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.selector.match_labels,
            spec.template.metadata.unwrap().labels
        );
    }

    #[test]
    fn metal_service_has_no_pod_selector() {
        let service = build_service(&svc(), true);
        assert!(service.spec.unwrap().selector.is_none());
    }

    #[test]
    fn containerized_service_selects_by_label() {
        let service = build_service(&svc(), false);
        assert!(service.spec.unwrap().selector.is_some());
    }

    #[test]
    fn endpoint_defaults_to_v1_path() {
        assert_eq!(
            endpoint_url(&svc()),
            "http://chat.default.svc.cluster.local:8080/v1"
        );
    }

    fn dotted_svc() -> InferenceService {
        let mut s = InferenceService::new(
            "llama-3.1-8b",
            InferenceServiceSpec {
                model_ref: "llama-3".to_owned(),
                ..Default::default()
            },
        );
        s.meta_mut().namespace = Some("default".into());
        s
    }

    #[test]
    fn build_service_sanitizes_dots_out_of_the_name() {
        let service = build_service(&dotted_svc(), false);
        assert_eq!(service.metadata.name.as_deref(), Some("llama-3-1-8b"));
    }

    #[test]
    fn endpoint_url_sanitizes_dots_out_of_the_hostname() {
        assert_eq!(
            endpoint_url(&dotted_svc()),
            "http://llama-3-1-8b.default.svc.cluster.local:8080/v1"
        );
    }
}
