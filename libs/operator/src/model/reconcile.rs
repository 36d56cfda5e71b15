//! The Model reconciler (spec.md §4.1): downloads the artifact named by
//! `spec.source` into a content-addressed path under the namespace cache
//! and reports readiness.

use crate::conditions::{set_condition, status_str};
use crate::controller::Context;
use crate::crd::model::{
    Accelerator, Model, ModelPhase, ModelStatus, CONDITION_AVAILABLE, CONDITION_DEGRADED,
    CONDITION_PROGRESSING,
};
use crate::error::{Error, Result};
use crate::telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{field, info, instrument, warn, Span};

pub const CONTROLLER_ID: &str = "model";
pub const ALL_PHASES: &[&str] = &["downloading", "ready", "failed"];

const RETRY_AFTER: Duration = Duration::from_secs(5 * 60);
const RESYNC_EVERY: Duration = Duration::from_secs(10 * 60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 30);

/// `lower_hex(first 8 bytes of SHA-256(source))`: a pure function of
/// `source`, so two Models with the same source share a cache entry
/// (spec.md §3 invariant).
pub fn cache_key(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..8])
}

/// Binary-prefixed size, one decimal place at and above KiB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn cache_path(cache_root: &str, key: &str) -> PathBuf {
    Path::new(cache_root).join(key).join("model.gguf")
}

/// Used by the InferenceService reconciler to reject a local, uncached
/// source before it builds a Deployment with nothing to mount (spec.md §4.3).
pub(crate) fn is_local_source(source: &str) -> bool {
    local_path(source).is_some()
}

fn local_path(source: &str) -> Option<&str> {
    if let Some(p) = source.strip_prefix("file://") {
        Some(p)
    } else if source.starts_with('/') {
        Some(source)
    } else {
        None
    }
}

/// Streams `source` into `dest`, writing to `<dest>.tmp` first and renaming
/// atomically on success so concurrent reconciles for the same cache key
/// never observe (or corrupt) a partial file.
async fn download(source: &str, dest: &Path) -> Result<u64> {
    if let Some(path) = dest.parent() {
        tokio::fs::create_dir_all(path).await?;
    }
    let tmp_dest = dest.with_extension("tmp");

    let size = if let Some(local) = local_path(source) {
        tokio::fs::copy(local, &tmp_dest)
            .await
            .map_err(|e| Error::CopyFailed(format!("{local}: {e}")))?
    } else {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let response = client.get(source).send().await?;
        if !response.status().is_success() {
            return Err(Error::DownloadFailed(format!(
                "{source}: HTTP {}",
                response.status()
            )));
        }
        let mut file = tokio::fs::File::create(&tmp_dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        written
    };

    tokio::fs::rename(&tmp_dest, dest).await?;
    Ok(size)
}

fn already_ready(model: &Model, dest: &Path) -> bool {
    matches!(model.status.as_ref(), Some(ModelStatus { phase: Some(ModelPhase::Ready), path: Some(p), .. }) if p == dest.to_string_lossy().as_ref())
}

async fn patch_status(api: &Api<Model>, name: &str, status: ModelStatus) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

#[instrument(skip(ctx, model), fields(trace_id))]
pub async fn reconcile_model(model: Arc<Model>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(CONTROLLER_ID, &trace_id);

    let namespace = model
        .namespace()
        .ok_or_else(|| Error::UserInputError("Model must be namespaced".to_owned()))?;
    let name = model.name_any();
    let api: Api<Model> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = model.meta().generation.unwrap_or_default();

    let key = cache_key(&model.spec.source);
    let dest = cache_path(&ctx.config.cache_root, &key);

    if dest.exists() && already_ready(&model, &dest) {
        ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "ready");
        return Ok(Action::requeue(RESYNC_EVERY));
    }

    if dest.exists() {
        // Crash recovery: the artifact landed but the status write never
        // completed. Re-enter Ready without downloading again.
        info!(msg = "cache file already present, skipping download", name = %name, path = %dest.display());
        return finish_ready(&api, &name, &key, &dest, &model, generation, ctx.clone()).await;
    }

    let mut status = model.status.clone().unwrap_or_default();
    status.phase = Some(ModelPhase::Downloading);
    status.cache_key = key.clone();
    set_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        true,
        "Downloading",
        "fetching model artifact",
        generation,
    );
    patch_status(&api, &name, status).await?;

    match download(&model.spec.source, &dest).await {
        Ok(_) => finish_ready(&api, &name, &key, &dest, &model, generation, ctx.clone()).await,
        Err(e) => {
            warn!(msg = "model download failed", name = %name, error = %e);
            ctx.metrics.reconcile.set_failure(CONTROLLER_ID, &*model, &e);
            let mut status = model.status.clone().unwrap_or_default();
            status.phase = Some(ModelPhase::Failed);
            set_condition(
                &mut status.conditions,
                CONDITION_DEGRADED,
                true,
                "DownloadFailed",
                &e.to_string(),
                generation,
            );
            set_condition(
                &mut status.conditions,
                CONDITION_AVAILABLE,
                false,
                "DownloadFailed",
                &e.to_string(),
                generation,
            );
            patch_status(&api, &name, status).await?;
            ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "failed");
            Ok(Action::requeue(RETRY_AFTER))
        }
    }
}

async fn finish_ready(
    api: &Api<Model>,
    name: &str,
    key: &str,
    dest: &Path,
    model: &Model,
    generation: i64,
    ctx: Arc<Context>,
) -> Result<Action> {
    let size = tokio::fs::metadata(dest).await?.len();
    let mut status = model.status.clone().unwrap_or_default();
    status.phase = Some(ModelPhase::Ready);
    status.cache_key = key.to_owned();
    status.path = Some(dest.to_string_lossy().into_owned());
    status.size = Some(format_size(size));
    status.accelerator_ready = matches!(
        model.spec.hardware.as_ref().map(|h| h.accelerator),
        None | Some(Accelerator::Cpu) | Some(Accelerator::Cuda) | Some(Accelerator::Metal)
    );
    set_condition(
        &mut status.conditions,
        CONDITION_AVAILABLE,
        true,
        "Ready",
        "model artifact cached",
        generation,
    );
    set_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        false,
        "Ready",
        "model artifact cached",
        generation,
    );
    info!(
        msg = "model ready",
        name = %name,
        size = %status.size.clone().unwrap_or_default(),
        status = %status_str(true),
    );
    patch_status(api, name, status).await?;
    ctx.metrics.reconcile.set_phase(CONTROLLER_ID, ALL_PHASES, "ready");
    Ok(Action::requeue(RESYNC_EVERY))
}

pub fn error_policy(model: Arc<Model>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(msg = "model reconcile failed", name = %model.name_any(), %error);
    ctx.metrics.reconcile.set_failure(CONTROLLER_ID, &*model, error);
    Action::requeue(RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_16_hex_chars() {
        let key = cache_key("https://example.test/m.gguf");
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn cache_key_is_pure_function_of_source() {
        assert_eq!(
            cache_key("https://example.test/a.gguf"),
            cache_key("https://example.test/a.gguf")
        );
        assert_ne!(
            cache_key("https://example.test/a.gguf"),
            cache_key("https://example.test/b.gguf")
        );
    }

    #[test]
    fn format_size_uses_binary_prefixes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KiB");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(4 * 1024 * 1024 * 1024), "4.0 GiB");
    }

    #[test]
    fn local_path_recognizes_file_scheme_and_absolute_paths() {
        assert_eq!(local_path("file:///models/a.gguf"), Some("/models/a.gguf"));
        assert_eq!(local_path("/models/a.gguf"), Some("/models/a.gguf"));
        assert_eq!(local_path("https://example.test/a.gguf"), None);
    }
}
