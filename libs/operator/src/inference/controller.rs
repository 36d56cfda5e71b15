use crate::controller::State;
use crate::crd::inference_service::InferenceService;
use crate::crd::model::Model;
use crate::inference::reconcile::{error_policy, reconcile_inference_service};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{controller::Controller, watcher::Config};
use kube::{Client, ResourceExt};
use tracing::{error, info};

/// Watches `InferenceService`, owns the Deployment/Service it creates, and
/// re-reconciles whenever the `Model` a service references changes (e.g.
/// finishes downloading) — spec.md §4.3 "reconciles on Model transitions".
pub async fn run(state: State, client: Client) {
    let services = Api::<InferenceService>::all(client.clone());
    if let Err(e) = services.list(&ListParams::default().limit(1)).await {
        error!("InferenceService CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let deployments = Api::<Deployment>::all(client.clone());
    let k8s_services = Api::<Service>::all(client.clone());
    let models = Api::<Model>::all(client.clone());

    let ctx = state.to_context(client);
    info!(msg = "starting inference service controller");
    let ctl = Controller::new(services, Config::default().any_semantic())
        .owns(deployments, Config::default())
        .owns(k8s_services, Config::default());
    let reader = ctl.store();
    ctl.watches(models, Config::default(), move |model| {
            reader
                .state()
                .into_iter()
                .filter(|svc| {
                    svc.spec.model_ref == model.name_any() && svc.namespace() == model.namespace()
                })
                .map(|svc| ObjectRef::from_obj(&*svc))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(reconcile_inference_service, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
