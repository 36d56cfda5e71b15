use crate::controller::State;
use crate::crd::model::Model;
use crate::model::reconcile::{error_policy, reconcile_model, CONTROLLER_ID};

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::{controller::Controller, watcher::Config};
use kube::Client;
use tracing::{error, info};

pub async fn run(state: State, client: Client) {
    let models = Api::<Model>::all(client.clone());
    if let Err(e) = models.list(&ListParams::default().limit(1)).await {
        error!("Model CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = state.to_context(client);
    info!(msg = "starting model controller");
    Controller::new(models, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile_model, error_policy, ctx.clone())
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
