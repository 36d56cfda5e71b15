//! Consumes watcher events and drives the executor/registry (spec.md §4.6
//! "Agent"). Create and Update are handled identically — ensure a healthy
//! process exists and the Service/Endpoints point at it — so a replayed
//! Created event after a restart is a no-op rather than a double-spawn.

use crate::error::Result;
use crate::executor::SharedExecutor;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::watcher::Event;

use std::net::IpAddr;
use std::sync::Arc;

use kube::api::Api;
use kube::{Client, ResourceExt};
use llmkube_operator::crd::inference_service::InferenceService;
use llmkube_operator::crd::model::{Accelerator, Model, ModelPhase};
use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

pub struct Agent {
    client: Client,
    executor: SharedExecutor,
    registry: Registry,
    host_ip: IpAddr,
    metrics: Metrics,
}

impl Agent {
    pub fn new(client: Client, executor: SharedExecutor, host_ip: IpAddr, metrics: Metrics) -> Self {
        let registry = Registry::new(client.clone());
        Self { client, executor, registry, host_ip, metrics }
    }

    pub async fn run(self: Arc<Self>, mut events: Receiver<Event>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event.clone()).await {
                warn!(msg = "failed to handle inference service event", event = ?event, error = %e);
                self.metrics.record_failure(&e);
            }
            self.metrics
                .managed_processes
                .set(self.executor.running_keys().await.len() as i64);
        }
    }

    async fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Created(svc) | Event::Updated(svc) => self.reconcile_local(svc).await,
            Event::Deleted { namespace, name } => {
                let key = format!("{namespace}/{name}");
                self.executor.stop(&key).await?;
                self.registry.unregister(&namespace, &name).await
            }
        }
    }

    async fn reconcile_local(&self, svc: InferenceService) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let key = format!("{namespace}/{}", svc.name_any());

        let models: Api<Model> = Api::namespaced(self.client.clone(), &namespace);
        let model = match models.get(&svc.spec.model_ref).await {
            Ok(m) => m,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                info!(msg = "referenced model not found, skipping", key = %key);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if model.spec.hardware.as_ref().map(|h| h.accelerator) != Some(Accelerator::Metal) {
            return Ok(());
        }
        let Some(status) = model.status.as_ref() else { return Ok(()) };
        if !matches!(status.phase, Some(ModelPhase::Ready)) {
            return Ok(());
        }

        let port = self.executor.ensure_running(&key, &model, &svc.spec).await?;
        self.registry.register(&svc, self.host_ip, port).await
    }
}
