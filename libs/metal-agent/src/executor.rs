//! Owns the host-side runtime process for a single `InferenceService`
//! (spec.md §4.6): downloads the model artifact, spawns `llama-server`,
//! polls it healthy, and stops it. One `Executor` per agent process; the
//! process table is behind a `RwLock` so `/healthz` and event handling can
//! run concurrently.

use crate::error::{Error, Result};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use llmkube_operator::crd::inference_service::InferenceServiceSpec;
use llmkube_operator::crd::model::Model;
use llmkube_operator::inference::args::build_args;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{info, warn};

const FIRST_PORT: u16 = 8080;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(10);

/// A process this agent spawned and is responsible for stopping.
pub struct ManagedProcess {
    pub key: String,
    pub port: u16,
    pub pid: u32,
    child: Child,
}

pub struct Executor {
    model_store: PathBuf,
    runtime_binary: PathBuf,
    next_port: AtomicU16,
    processes: RwLock<HashMap<String, ManagedProcess>>,
}

fn model_key(model: &Model) -> String {
    let digest = Sha256::digest(model.spec.source.as_bytes());
    hex::encode(&digest[..8])
}

fn model_dest(model_store: &Path, model: &Model) -> PathBuf {
    model_store.join(model_key(model)).join("model.gguf")
}

impl Executor {
    pub fn new(model_store: PathBuf, runtime_binary: PathBuf) -> Self {
        Self {
            model_store,
            runtime_binary,
            next_port: AtomicU16::new(FIRST_PORT),
            processes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.processes.read().await.contains_key(key)
    }

    pub async fn port_of(&self, key: &str) -> Option<u16> {
        self.processes.read().await.get(key).map(|p| p.port)
    }

    /// Downloads the model into the local store (reusing an existing copy)
    /// and spawns the runtime, polling `/health` until it answers or the
    /// timeout elapses. No-op if a process for `key` is already tracked.
    pub async fn ensure_running(
        &self,
        key: &str,
        model: &Model,
        spec: &InferenceServiceSpec,
    ) -> Result<u16> {
        if let Some(port) = self.port_of(key).await {
            return Ok(port);
        }

        let dest = model_dest(&self.model_store, model);
        if !dest.exists() {
            download(&model.spec.source, &dest).await?;
        }

        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let args = build_args(&dest.to_string_lossy(), port, model, spec);

        info!(msg = "spawning runtime process", key = %key, port = %port);
        let child = Command::new(&self.runtime_binary)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::SpawnFailed("process exited immediately".to_owned()))?;

        wait_healthy(port).await?;

        self.processes.write().await.insert(
            key.to_owned(),
            ManagedProcess { key: key.to_owned(), port, pid, child },
        );
        Ok(port)
    }

    /// SIGTERM, wait up to 10s, SIGKILL if it's still alive.
    pub async fn stop(&self, key: &str) -> Result<()> {
        let mut table = self.processes.write().await;
        let Some(mut proc) = table.remove(key) else {
            return Ok(());
        };
        drop(table);

        info!(msg = "stopping runtime process", key = %key, pid = %proc.pid);
        terminate(proc.pid, false)?;

        let waited = tokio::time::timeout(STOP_GRACE, proc.child.wait()).await;
        if waited.is_err() {
            warn!(msg = "process did not exit within grace period, killing", key = %key, pid = %proc.pid);
            terminate(proc.pid, true)?;
            let _ = proc.child.wait().await;
        }
        Ok(())
    }

    pub async fn running_keys(&self) -> Vec<String> {
        self.processes.read().await.keys().cloned().collect()
    }
}

#[cfg(unix)]
fn terminate(pid: u32, force: bool) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| Error::StopFailed(format!("pid {pid}: {e}")))
}

#[cfg(not(unix))]
fn terminate(_pid: u32, _force: bool) -> Result<()> {
    Err(Error::StopFailed("process control is only implemented on unix".to_owned()))
}

async fn wait_healthy(port: u16) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");
    let deadline = tokio::time::Instant::now() + HEALTH_TIMEOUT;

    while tokio::time::Instant::now() < deadline {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
    Err(Error::HealthCheckTimeout(url))
}

async fn download(source: &str, dest: &Path) -> Result<()> {
    if let Some(path) = dest.parent() {
        tokio::fs::create_dir_all(path).await?;
    }
    let tmp_dest = dest.with_extension("tmp");

    if let Some(local) = source.strip_prefix("file://").or_else(|| {
        source.starts_with('/').then_some(source)
    }) {
        tokio::fs::copy(local, &tmp_dest).await?;
    } else {
        let client = reqwest::Client::new();
        let response = client.get(source).send().await?;
        if !response.status().is_success() {
            return Err(Error::DownloadFailed(format!("{source}: HTTP {}", response.status())));
        }
        let mut file = tokio::fs::File::create(&tmp_dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
    }

    tokio::fs::rename(&tmp_dest, dest).await?;
    Ok(())
}

pub type SharedExecutor = Arc<Executor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_key_is_pure_function_of_source() {
        let mut a = Model::default();
        a.spec.source = "https://example.test/a.gguf".to_owned();
        let mut b = Model::default();
        b.spec.source = "https://example.test/a.gguf".to_owned();
        let mut c = Model::default();
        c.spec.source = "https://example.test/c.gguf".to_owned();
        assert_eq!(model_key(&a), model_key(&b));
        assert_ne!(model_key(&a), model_key(&c));
    }

    #[tokio::test]
    async fn ensure_running_is_a_no_op_when_already_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::new(dir.path().to_path_buf(), PathBuf::from("/bin/true"));
        assert!(!executor.is_running("svc").await);
    }
}
