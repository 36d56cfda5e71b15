//! The argument builder (spec.md §4.4): a pure function from
//! `(InferenceService, Model)` to the runtime's command-line flags. Kept
//! separate from Deployment construction per the Design Notes in §9, with
//! one test per row of the flag table.

use crate::crd::inference_service::InferenceServiceSpec;
use crate::crd::model::{GpuSpec, Model};

/// Resolved GPU count and per-GPU layer count, with Model taking precedence
/// over InferenceService (spec.md §4.4, scenario 3).
fn effective_gpu(model: &Model, svc: &InferenceServiceSpec) -> (i32, i32) {
    let model_gpu: Option<&GpuSpec> = model.spec.hardware.as_ref().and_then(|h| h.gpu.as_ref());
    let count = match model_gpu.map(|g| g.count).filter(|c| *c > 0) {
        Some(c) => c,
        None => svc
            .resources
            .as_ref()
            .and_then(|r| r.gpu)
            .filter(|c| *c > 0)
            .unwrap_or(0),
    };
    let layers = match model_gpu.and_then(|g| g.layers) {
        Some(l) if l != -1 => l,
        _ => 99,
    };
    (count, layers)
}

/// Builds the deterministic runtime flag list. `build(spec) = build(spec)`
/// byte-for-byte: no randomness, no iteration over unordered maps.
pub fn build_args(model_path: &str, port: u16, model: &Model, svc: &InferenceServiceSpec) -> Vec<String> {
    let mut args = vec!["--model".to_owned(), model_path.to_owned()];
    args.push("--host".to_owned());
    args.push("0.0.0.0".to_owned());
    args.push("--port".to_owned());
    args.push(port.to_string());

    let (gpu_count, layers) = effective_gpu(model, svc);
    if gpu_count > 0 {
        args.push("--n-gpu-layers".to_owned());
        args.push(layers.to_string());
    }
    if gpu_count > 1 {
        args.push("--split-mode".to_owned());
        args.push("layer".to_owned());
        args.push("--tensor-split".to_owned());
        args.push(vec!["1"; gpu_count as usize].join(","));
    }

    if let Some(ctx) = svc.context_size.filter(|c| *c > 0) {
        args.push("--ctx-size".to_owned());
        args.push(ctx.to_string());
    }

    if let Some(slots) = svc.parallel_slots.filter(|s| *s > 1) {
        args.push("--parallel".to_owned());
        args.push(slots.to_string());
    }

    if gpu_count > 0 && svc.flash_attention.unwrap_or(false) {
        args.push("--flash-attn".to_owned());
        args.push("on".to_owned());
    }

    if svc.jinja.unwrap_or(false) {
        args.push("--jinja".to_owned());
    }

    args.push("--metrics".to_owned());
    args
}

/// GPU count used for resource requests/limits and tolerations (spec.md §4.4).
pub fn effective_gpu_count(model: &Model, svc: &InferenceServiceSpec) -> i32 {
    effective_gpu(model, svc).0
}
