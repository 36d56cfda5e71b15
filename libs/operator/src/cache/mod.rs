//! Cache PVC manager (spec.md §4.2): ensures, at most once per reconcile,
//! that a namespace-scoped cache volume exists before a consumer needs it.

use crate::controller::OperatorConfig;
use crate::error::{Error, Result};

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

/// Fixed per-namespace constant: volume-per-model would multiply PVC count
/// without benefit (spec.md §4.2 rationale).
pub const CACHE_PVC_NAME: &str = "llmkube-model-cache";

static QUANTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ei|Pi|Ti|Gi|Mi|Ki|E|P|T|G|M|k|m)?$").unwrap());

fn validate_size(size: &str) -> Result<()> {
    if QUANTITY_RE.is_match(size) {
        Ok(())
    } else {
        Err(Error::SizeParseError(size.to_owned()))
    }
}

/// Idempotent: a caller observing `AlreadyExists` on create simply proceeds,
/// matching the "subsequent callers observe AlreadyExists" contract.
pub async fn ensure_cache_pvc(client: Client, namespace: &str, config: &OperatorConfig) -> Result<()> {
    validate_size(&config.cache_default_size)?;

    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    if api.get_opt(CACHE_PVC_NAME).await?.is_some() {
        return Ok(());
    }

    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_owned(),
        "llmkube-controller".to_owned(),
    );

    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_owned(),
        Quantity(config.cache_default_size.clone()),
    );

    let pvc = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(CACHE_PVC_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![config.cache_access_mode.clone()]),
            storage_class_name: config.cache_storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    match api.create(&PostParams::default(), &pvc).await {
        Ok(_) => {
            info!(msg = "created cache PVC", namespace = %namespace, name = CACHE_PVC_NAME);
            Ok(())
        }
        Err(kube::Error::Api(ref e)) if e.code == 409 => Ok(()),
        Err(e) => Err(Error::PVCCreateFailed(e.to_string())),
    }
}
