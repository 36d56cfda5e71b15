//! Polls `InferenceService` every 5 s and turns resource-version transitions
//! into Created/Updated/Deleted events (spec.md §4.6 "Watcher"). A
//! long-running watch would be preferable; polling is the specified
//! behavior, kept simple enough to reason about under partitions.

use crate::error::Result;

use std::collections::HashMap;
use std::time::Duration;

use kube::api::{Api, ListParams};
use kube::{Client, Resource, ResourceExt};
use llmkube_operator::crd::inference_service::InferenceService;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;
use tracing::{info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub enum Event {
    Created(InferenceService),
    Updated(InferenceService),
    Deleted { namespace: String, name: String },
}

fn namespaced_key(svc: &InferenceService) -> String {
    format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any())
}

/// Runs until `tx` is dropped (the agent shut down). Never returns an error:
/// a failed poll is logged and retried on the next tick, matching the
/// "eventually consistent, not strictly ordered" contract in spec.md §5.
pub async fn run(client: Client, namespace: Option<String>, tx: Sender<Event>) {
    let api: Api<InferenceService> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut known: HashMap<String, String> = HashMap::new();
    let mut ticker = interval(POLL_INTERVAL);

    loop {
        ticker.tick().await;
        match poll_once(&api, &mut known, &tx).await {
            Ok(()) => {}
            Err(e) => warn!(msg = "watcher poll failed", error = %e),
        }
    }
}

async fn poll_once(
    api: &Api<InferenceService>,
    known: &mut HashMap<String, String>,
    tx: &Sender<Event>,
) -> Result<()> {
    let list = api.list(&ListParams::default()).await?;
    let mut seen = std::collections::HashSet::new();

    for svc in list.items {
        let key = namespaced_key(&svc);
        seen.insert(key.clone());
        let resource_version = svc.resource_version().unwrap_or_default();

        match known.get(&key) {
            None => {
                info!(msg = "observed new inference service", key = %key);
                known.insert(key, resource_version);
                let _ = tx.send(Event::Created(svc)).await;
            }
            Some(previous) if previous != &resource_version => {
                known.insert(key, resource_version);
                let _ = tx.send(Event::Updated(svc)).await;
            }
            Some(_) => {}
        }
    }

    let gone: Vec<String> = known.keys().filter(|k| !seen.contains(*k)).cloned().collect();
    for key in gone {
        known.remove(&key);
        if let Some((namespace, name)) = key.split_once('/') {
            let _ = tx
                .send(Event::Deleted {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                })
                .await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_key_joins_namespace_and_name() {
        let mut svc = InferenceService::new(
            "chat",
            llmkube_operator::crd::inference_service::InferenceServiceSpec::default(),
        );
        svc.meta_mut().namespace = Some("default".into());
        assert_eq!(namespaced_key(&svc), "default/chat");
    }
}
