use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single-file GGUF artifact, addressed by `source` and materialized into
/// a namespace-scoped, content-addressed cache by the Model reconciler.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "inference.llmkube.ai",
    version = "v1alpha1",
    kind = "Model",
    plural = "models",
    shortname = "llmm",
    namespaced,
    status = "ModelStatus",
    derive = "Default,PartialEq",
    printcolumn = r#"{"jsonPath": ".status.phase", "name": "Phase", "type": "string"}"#,
    printcolumn = r#"{"jsonPath": ".status.size", "name": "Size", "type": "string"}"#,
    printcolumn = r#"{"jsonPath": ".metadata.creationTimestamp", "name": "Age", "type": "date"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Absolute path, `file://` URL, or HTTP(S) URL of the GGUF artifact.
    pub source: String,

    /// Always GGUF in this spec; kept as a field for forward compatibility.
    #[serde(default)]
    pub format: ModelFormat,

    /// Informational only; not interpreted by the reconciler.
    pub quantization: Option<String>,

    pub hardware: Option<HardwareSpec>,

    pub resources: Option<ModelResourceHints>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelFormat {
    #[default]
    Gguf,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    #[serde(default)]
    pub accelerator: Accelerator,
    pub gpu: Option<GpuSpec>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuSpec {
    #[serde(default)]
    pub count: i32,
    pub vendor: Option<String>,
    /// -1 or unset means "offload all layers"; resolved to 99 by the
    /// argument builder.
    pub layers: Option<i32>,
    pub sharding: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelResourceHints {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ModelPhase {
    Downloading,
    Ready,
    Failed,
}

pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// `None` is the "empty" phase from spec.md: the reconciler has not yet
    /// observed this object.
    pub phase: Option<ModelPhase>,

    /// 16 lowercase-hex characters, `lower_hex(first 8 bytes of SHA-256(source))`.
    #[serde(default)]
    pub cache_key: String,

    /// Absolute path inside the cache volume, e.g. `<cacheRoot>/<cacheKey>/model.gguf`.
    pub path: Option<String>,

    /// Human-readable, binary-prefixed size ("4.1 GiB").
    pub size: Option<String>,

    #[serde(default)]
    pub accelerator_ready: bool,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    pub last_updated: Option<Time>,

    #[serde(default)]
    pub observed_generation: i64,
}
