//! Error taxonomy from spec.md §7. Every variant is surfaced as a status
//! condition on the owning resource (see `conditions.rs`); none are
//! swallowed silently.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("invalid resource: {0}")]
    UserInputError(String),

    #[error("Model {0:?} not found")]
    ModelNotFound(String),

    #[error("Model {0:?} is not Ready yet")]
    ModelNotReady(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("local copy failed: {0}")]
    CopyFailed(String),

    #[error("local source requires a cache volume but caching is disabled")]
    LocalSourceRequiresCache,

    #[error("insufficient {resource}: waiting for {count}")]
    InsufficientGPU { resource: String, count: i32 },

    #[error("failed to create Deployment: {0}")]
    DeploymentCreateFailed(String),

    #[error("failed to create Service: {0}")]
    ServiceCreateFailed(String),

    #[error("failed to create PersistentVolumeClaim: {0}")]
    PVCCreateFailed(String),

    #[error("could not parse size {0:?}")]
    SizeParseError(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid trace id")]
    InvalidTraceId,
}

impl Error {
    /// Bounded-cardinality label for the reconcile-failure metric; never the
    /// free-form `Display` message, which could carry a URL or file path.
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube_error",
            Error::UserInputError(_) => "user_input_error",
            Error::ModelNotFound(_) => "model_not_found",
            Error::ModelNotReady(_) => "model_not_ready",
            Error::DownloadFailed(_) => "download_failed",
            Error::CopyFailed(_) => "copy_failed",
            Error::LocalSourceRequiresCache => "local_source_requires_cache",
            Error::InsufficientGPU { .. } => "insufficient_gpu",
            Error::DeploymentCreateFailed(_) => "deployment_create_failed",
            Error::ServiceCreateFailed(_) => "service_create_failed",
            Error::PVCCreateFailed(_) => "pvc_create_failed",
            Error::SizeParseError(_) => "size_parse_error",
            Error::Http(_) => "http_error",
            Error::Io(_) => "io_error",
            Error::InvalidTraceId => "invalid_trace_id",
        }
        .to_owned()
    }
}
