//! Registers the selector-less Service and manually-managed Endpoints a
//! Metal-backed `InferenceService` needs (spec.md §4.6), mirroring the
//! selector-less `Service` shape `inference::deployment::build_service`
//! builds for the in-cluster case, but paired with an `Endpoints` object the
//! Deployment-backed path never needs because kube-proxy populates it from
//! pod selectors there.

use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::{
    Endpoints, EndpointAddress, EndpointPort, EndpointSubset, Service,
};
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use llmkube_operator::crd::inference_service::InferenceService;
pub use llmkube_operator::inference::deployment::sanitize_name;
use kube::ResourceExt;
use tracing::info;

const APPLY_MANAGER: &str = "llmkube-metal-agent";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "metal-agent";
const INFERENCE_SERVICE_LABEL: &str = "llmkube.ai/inference-service";
const METAL_ACCELERATED_ANNOTATION: &str = "llmkube.ai/metal-accelerated";
const NATIVE_PROCESS_ANNOTATION: &str = "llmkube.ai/native-process";

/// Resolves the IP the host agent should advertise: an explicit override,
/// else `host.docker.internal`, else a fixed loopback fallback. Real
/// deployments are expected to set `--host-ip` explicitly; the fallback only
/// keeps local smoke-testing working.
pub async fn resolve_host_ip(explicit: Option<&str>) -> Result<IpAddr> {
    if let Some(ip) = explicit {
        return ip.parse().map_err(|_| Error::HostIpUnresolved);
    }
    if let Ok(addrs) = tokio::net::lookup_host(("host.docker.internal", 0)).await {
        if let Some(addr) = addrs.into_iter().next() {
            return Ok(addr.ip());
        }
    }
    "127.0.0.1".parse().map_err(|_| Error::HostIpUnresolved)
}

/// Labels for the Service and Endpoints the host agent creates directly —
/// deliberately independent of `inference::deployment::labels`, which
/// stamps `app.kubernetes.io/managed-by=llmkube-controller` for the
/// controller's own Deployment-backed resources. Agent-registered objects
/// are never controller-managed.
fn agent_labels(svc: &InferenceService) -> BTreeMap<String, String> {
    let mut l = BTreeMap::new();
    l.insert("app.kubernetes.io/name".to_owned(), "llmkube".to_owned());
    l.insert("app.kubernetes.io/instance".to_owned(), svc.name_any());
    l.insert(MANAGED_BY_LABEL.to_owned(), MANAGED_BY_VALUE.to_owned());
    l.insert(INFERENCE_SERVICE_LABEL.to_owned(), svc.name_any());
    l
}

fn agent_annotations() -> BTreeMap<String, String> {
    let mut a = BTreeMap::new();
    a.insert(METAL_ACCELERATED_ANNOTATION.to_owned(), "true".to_owned());
    a.insert(NATIVE_PROCESS_ANNOTATION.to_owned(), "true".to_owned());
    a
}

pub struct Registry {
    client: Client,
}

impl Registry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates or updates the selector-less Service and its Endpoints,
    /// pointing at `host_ip:port`.
    pub async fn register(&self, svc: &InferenceService, host_ip: IpAddr, port: u16) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = sanitize_name(&svc.name_any());
        let labels = agent_labels(svc);
        let annotations = agent_annotations();

        let service = Service {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
                selector: None,
                ports: Some(vec![k8s_openapi::api::core::v1::ServicePort {
                    port: port as i32,
                    target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(port as i32)),
                    name: Some("http".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: host_ip.to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    port: port as i32,
                    name: Some("http".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        };

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let endpoints_api: Api<Endpoints> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(APPLY_MANAGER).force();

        services.patch(&name, &params, &Patch::Apply(service)).await?;
        endpoints_api.patch(&name, &params, &Patch::Apply(endpoints)).await?;
        info!(msg = "registered metal endpoint", name = %name, ip = %host_ip, port = %port);
        Ok(())
    }

    /// Deletes the Service/Endpoints this agent created. Not an error if
    /// they're already gone (a prior unregister, or they were never created).
    pub async fn unregister(&self, namespace: &str, name: &str) -> Result<()> {
        let name = sanitize_name(name);
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let endpoints_api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);

        for result in [
            services.delete(&name, &Default::default()).await.map(|_| ()),
            endpoints_api.delete(&name, &Default::default()).await.map(|_| ()),
        ] {
            match result {
                Ok(()) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(msg = "unregistered metal endpoint", name = %name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_replaces_invalid_chars() {
        assert_eq!(sanitize_name("Chat_Service"), "chat-service");
    }

    #[test]
    fn sanitize_prefixes_when_leading_char_is_not_a_letter() {
        assert_eq!(sanitize_name("123-chat"), "svc-123-chat");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_name("My.Service.1");
        assert_eq!(sanitize_name(&once), once);
    }

    #[test]
    fn agent_labels_are_not_stamped_as_controller_managed() {
        let svc = InferenceService::new(
            "chat",
            llmkube_operator::crd::inference_service::InferenceServiceSpec {
                model_ref: "llama-3".to_owned(),
                ..Default::default()
            },
        );
        let labels = agent_labels(&svc);
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some("metal-agent"));
        assert_eq!(
            labels.get(INFERENCE_SERVICE_LABEL).map(String::as_str),
            Some("chat")
        );
    }

    #[test]
    fn agent_annotations_carry_the_metal_markers() {
        let annotations = agent_annotations();
        assert_eq!(
            annotations.get(METAL_ACCELERATED_ANNOTATION).map(String::as_str),
            Some("true")
        );
        assert_eq!(
            annotations.get(NATIVE_PROCESS_ANNOTATION).map(String::as_str),
            Some("true")
        );
    }
}
