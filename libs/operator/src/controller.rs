//! Shared reconciler plumbing: the `Context` injected into every
//! `reconcile`/`error_policy` pair, the `State` the HTTP server reads
//! diagnostics and metrics from, and the controller-level configuration
//! from spec.md §6 "Operator configuration".

use crate::metrics::Metrics;

use chrono::{DateTime, Utc};
use kube::runtime::events::Reporter;
use kube::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type ControllerId = &'static str;

/// Process-wide, fixed-at-startup configuration (spec.md §6).
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub cache_root: String,
    pub cache_enabled: bool,
    pub cache_default_size: String,
    pub cache_storage_class: Option<String>,
    pub cache_access_mode: String,
    pub custom_ca_configmap: Option<String>,
    pub init_container_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cache_root: "/var/lib/llmkube/cache".to_owned(),
            cache_enabled: true,
            cache_default_size: "100Gi".to_owned(),
            cache_storage_class: None,
            cache_access_mode: "ReadWriteOnce".to_owned(),
            custom_ca_configmap: None,
            init_container_image: "ghcr.io/llmkube/model-fetcher:latest".to_owned(),
        }
    }
}

/// Context injected into every reconciler.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub metrics: Arc<Metrics>,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub config: Arc<OperatorConfig>,
}

/// Diagnostics read by the web server (`/healthz`), not part of any CRD
/// status — operational debugging only.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "llmkube-controller".into(),
        }
    }
}

/// State shared between the controllers and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    config: Arc<OperatorConfig>,
}

impl State {
    pub fn new(metrics: Metrics, config: OperatorConfig) -> Self {
        Self {
            diagnostics: Arc::default(),
            metrics: Arc::new(metrics),
            config: Arc::new(config),
        }
    }

    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        prometheus_client::encoding::text::encode(&mut buffer, registry).unwrap();
        buffer
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            config: self.config.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use http::{Request, Response};
    use kube::client::Body;

    impl Context {
        /// A `Context` wired to a mocked API server, for reconciler tests
        /// that need to assert on exact requests without a real cluster.
        pub fn test() -> (Arc<Self>, tower_test::mock::Handle<Request<Body>, Response<Body>>) {
            let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
            let mock_client = kube::Client::new(mock_service, "default");
            let ctx = Self {
                client: mock_client,
                metrics: Arc::default(),
                diagnostics: Arc::default(),
                config: Arc::new(OperatorConfig::default()),
            };
            (Arc::new(ctx), handle)
        }
    }
}
