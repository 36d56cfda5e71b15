//! Error taxonomy for the host-side agent (spec.md §4.6, §7), mirroring
//! `llmkube_operator::error::Error` in shape: one enum, bounded-cardinality
//! metric labels, no swallowed errors.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("failed to spawn runtime process: {0}")]
    SpawnFailed(String),

    #[error("process did not become healthy within the timeout: {0}")]
    HealthCheckTimeout(String),

    #[error("failed to stop process: {0}")]
    StopFailed(String),

    #[error("could not resolve a host IP to register")]
    HostIpUnresolved,
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube_error",
            Error::Io(_) => "io_error",
            Error::Http(_) => "http_error",
            Error::DownloadFailed(_) => "download_failed",
            Error::SpawnFailed(_) => "spawn_failed",
            Error::HealthCheckTimeout(_) => "health_check_timeout",
            Error::StopFailed(_) => "stop_failed",
            Error::HostIpUnresolved => "host_ip_unresolved",
        }
        .to_owned()
    }
}
