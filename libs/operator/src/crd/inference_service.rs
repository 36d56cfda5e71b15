use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One OpenAI-compatible serving deployment for a `Model`.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "inference.llmkube.ai",
    version = "v1alpha1",
    kind = "InferenceService",
    plural = "inferenceservices",
    shortname = "llms",
    namespaced,
    status = "InferenceServiceStatus",
    derive = "PartialEq",
    printcolumn = r#"{"jsonPath": ".status.phase", "name": "Phase", "type": "string"}"#,
    printcolumn = r#"{"jsonPath": ".status.readyReplicas", "name": "Ready", "type": "integer"}"#,
    printcolumn = r#"{"jsonPath": ".status.queuePosition", "name": "Queue", "type": "integer"}"#,
    printcolumn = r#"{"jsonPath": ".metadata.creationTimestamp", "name": "Age", "type": "date"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    /// Name of a `Model` in the same namespace.
    pub model_ref: String,

    pub replicas: Option<i32>,

    /// Runtime container image; a per-accelerator default is selected when unset.
    pub image: Option<String>,

    pub endpoint: Option<EndpointSpec>,

    pub resources: Option<InferenceResourceSpec>,

    pub context_size: Option<i64>,

    pub parallel_slots: Option<i32>,

    pub flash_attention: Option<bool>,

    pub jinja: Option<bool>,

    pub priority: Option<Priority>,

    pub priority_class_name: Option<String>,

    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl InferenceServiceSpec {
    pub fn replicas_or_default(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub port: Option<u16>,
    pub path: Option<String>,
    pub exposure: Option<Exposure>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Exposure {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub gpu: Option<i32>,
    pub gpu_memory: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Batch,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum InferenceServicePhase {
    Pending,
    Creating,
    Progressing,
    WaitingForGPU,
    Ready,
    Failed,
}

pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_GPU_AVAILABLE: &str = "GPUAvailable";
pub const CONDITION_DEGRADED: &str = "Degraded";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    pub phase: Option<InferenceServicePhase>,

    #[serde(default)]
    pub model_ready: bool,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default)]
    pub desired_replicas: i32,

    pub endpoint: Option<String>,

    pub scheduling_status: Option<String>,

    pub scheduling_message: Option<String>,

    /// Human-readable description of what the service is still waiting on,
    /// e.g. `"nvidia.com/gpu: 2"`.
    pub waiting_for: Option<String>,

    /// 1-based rank among all cluster-wide WaitingForGPU services; 0 means
    /// not queued.
    #[serde(default)]
    pub queue_position: i32,

    #[serde(default)]
    pub effective_priority: i64,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub observed_generation: i64,
}
