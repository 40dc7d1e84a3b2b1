//! Resource discovery and filtering for the Applications stage.
//!
//! Walks every discovered API group/version, selects the migratable kinds,
//! lists instances in the target namespaces and applies per-kind admission
//! rules. Admitted objects get a ResourceInfo entry before anything is
//! applied remotely.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{DynamicObject, ListParams};
use kube::core::TypeMeta;
use kube::discovery::{Discovery, Scope};
use kube::{Api, ResourceExt};
use tracing::{debug, error};

use crate::clusterpair::ClusterPairStatus;
use crate::controller::apply;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::transform;
use crate::crd::{Migration, MigrationStage, MigrationState, ResourceInfo};
use crate::unstructured;

/// Kinds that migrate between clusters.
const MIGRATABLE_KINDS: &[&str] = &[
    "PersistentVolumeClaim",
    "PersistentVolume",
    "Deployment",
    "StatefulSet",
    "ConfigMap",
    "Service",
    "Secret",
];

/// Whether a discovered (group, kind) is selected for migration.
pub fn resource_to_be_migrated(group: &str, kind: &str) -> bool {
    // Deployment surfaces in both "apps" and "extensions"; only the "apps"
    // version migrates.
    if group == "extensions" && kind == "Deployment" {
        return false;
    }
    MIGRATABLE_KINDS.contains(&kind)
}

/// Whether every selector label is present with the same value.
pub fn labels_in_whitelist(
    selectors: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selectors
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Render the spec selectors as a list-request label selector.
pub fn selector_string(selectors: &BTreeMap<String, String>) -> String {
    selectors
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether a Service instance migrates. The cluster's own `kubernetes`
/// Service never does.
pub fn service_to_be_migrated(name: &str) -> bool {
    name != "kubernetes"
}

/// Whether a Secret instance migrates. Service-account tokens are bound to
/// the source cluster.
pub fn secret_to_be_migrated(secret_type: Option<&str>) -> bool {
    secret_type != Some("kubernetes.io/service-account-token")
}

fn pvc_is_bound(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Bound")
}

/// If a PersistentVolume is bound to a claim in the given namespace,
/// return the claim's name.
pub fn pv_claim_in_namespace<'a>(
    data: &'a serde_json::Value,
    namespace: &str,
) -> Option<&'a str> {
    if unstructured::get_string(data, "status.phase") != Some("Bound") {
        return None;
    }
    let pvc_name = unstructured::get_string(data, "spec.claimRef.name")?;
    if pvc_name.is_empty() {
        return None;
    }
    if unstructured::get_string(data, "spec.claimRef.namespace") != Some(namespace) {
        return None;
    }
    Some(pvc_name)
}

/// Orchestrate the Applications stage: discover, transform, apply.
pub async fn migrate_resources(migration: &mut Migration, ctx: &Context) -> Result<()> {
    let namespace = migration.metadata.namespace.clone().unwrap_or_default();
    let scheduler_status = ctx
        .cluster_pairs
        .scheduler_status(&migration.spec.cluster_pair, &namespace)
        .await?;
    if scheduler_status != ClusterPairStatus::Ready {
        return Err(Error::NotReady(format!(
            "Scheduler cluster pair is not ready. Status: {scheduler_status}"
        )));
    }

    let mut objects = match collect_resources(migration, ctx).await {
        Ok(objects) => objects,
        Err(e) => {
            error!(error = %e, "Error getting resources");
            return Err(e);
        }
    };

    if let Err(e) = transform::prepare_resources(migration, ctx, &mut objects).await {
        ctx.publish_warning_event(
            migration,
            &MigrationState::Failed.to_string(),
            "PreparingResources",
            Some(format!("Error preparing resource: {e}")),
        )
        .await;
        return Err(e);
    }
    if let Err(e) = apply::apply_resources(migration, ctx, &objects).await {
        ctx.publish_warning_event(
            migration,
            &MigrationState::Failed.to_string(),
            "ApplyingResources",
            Some(format!("Error applying resource: {e}")),
        )
        .await;
        return Err(e);
    }

    {
        let status = migration.ensure_status();
        status.stage = MigrationStage::Final;
        status.status = apply::applications_state(&status.resources);
    }
    ctx.update_migration_status(migration).await?;
    Ok(())
}

/// Walk the discovered API surface and collect migratable objects.
///
/// `Status.Resources` is persisted after each group so progress stays
/// visible; a retried walk overwrites any stale prefix.
async fn collect_resources(
    migration: &mut Migration,
    ctx: &Context,
) -> Result<Vec<DynamicObject>> {
    let discovery = Discovery::new(ctx.client.clone())
        .run()
        .await
        .map_err(Error::Kube)?;

    let mut all_objects = Vec::new();
    let mut resource_infos = Vec::new();

    for group in discovery.groups() {
        if group.name() == "extensions" {
            continue;
        }

        // UIDs admitted within this group; the same object may surface via
        // multiple versions.
        let mut admitted: HashSet<String> = HashSet::new();

        let versions: Vec<String> = group.versions().map(|v| v.to_string()).collect();
        for version in &versions {
            for (api_resource, capabilities) in group.versioned_resources(version) {
                if !resource_to_be_migrated(group.name(), &api_resource.kind) {
                    continue;
                }

                for ns in &migration.spec.namespaces {
                    let api: Api<DynamicObject> = if matches!(capabilities.scope, Scope::Cluster) {
                        Api::all_with(ctx.client.clone(), &api_resource)
                    } else {
                        Api::namespaced_with(ctx.client.clone(), ns, &api_resource)
                    };

                    // PVs don't inherit labels from their PVCs; the claim is
                    // checked against the selectors during admission instead.
                    let mut list_params = ListParams::default();
                    if api_resource.kind != "PersistentVolume" {
                        let selectors = selector_string(&migration.spec.selectors);
                        if !selectors.is_empty() {
                            list_params = list_params.labels(&selectors);
                        }
                    }

                    let list = api.list(&list_params).await?;
                    for mut object in list {
                        object.types = Some(TypeMeta {
                            api_version: api_resource.api_version.clone(),
                            kind: api_resource.kind.clone(),
                        });

                        if !object_to_be_migrated(migration, ctx, &admitted, &object, ns).await? {
                            continue;
                        }

                        let group_name = if group.name().is_empty() {
                            "core".to_string()
                        } else {
                            group.name().to_string()
                        };
                        debug!(
                            kind = %api_resource.kind,
                            name = %object.name_any(),
                            "Selected resource for migration"
                        );
                        resource_infos.push(ResourceInfo {
                            group: group_name,
                            version: version.to_string(),
                            kind: api_resource.kind.clone(),
                            name: object.name_any(),
                            namespace: object.namespace().unwrap_or_default(),
                            status: MigrationState::InProgress,
                            reason: String::new(),
                        });
                        if let Some(uid) = object.uid() {
                            admitted.insert(uid);
                        }
                        all_objects.push(object);
                    }
                }
            }
        }

        migration.ensure_status().resources = resource_infos.clone();
        ctx.update_migration_status(migration).await?;
    }

    Ok(all_objects)
}

/// Per-kind admission of one listed instance.
async fn object_to_be_migrated(
    migration: &Migration,
    ctx: &Context,
    admitted: &HashSet<String>,
    object: &DynamicObject,
    namespace: &str,
) -> Result<bool> {
    // Skip objects already admitted through another version of the group.
    if let Some(uid) = object.uid()
        && admitted.contains(&uid)
    {
        return Ok(false);
    }

    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or_default();

    match kind {
        "Service" => Ok(service_to_be_migrated(&object.name_any())),
        "PersistentVolumeClaim" => {
            let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
            let pvc = api.get(&object.name_any()).await?;
            if !pvc_is_bound(&pvc) {
                return Ok(false);
            }
            Ok(ctx.driver.owns_pvc(&pvc))
        }
        "PersistentVolume" => {
            let Some(pvc_name) = pv_claim_in_namespace(&object.data, namespace) else {
                return Ok(false);
            };

            let api: Api<PersistentVolumeClaim> =
                Api::namespaced(ctx.client.clone(), namespace);
            let pvc = api.get(pvc_name).await?;
            if !ctx.driver.owns_pvc(&pvc) {
                return Ok(false);
            }

            let labels = pvc.metadata.labels.clone().unwrap_or_default();
            if labels.is_empty() && !migration.spec.selectors.is_empty() {
                return Ok(false);
            }
            Ok(labels_in_whitelist(&migration.spec.selectors, &labels))
        }
        "Secret" => Ok(secret_to_be_migrated(unstructured::get_string(
            &object.data,
            "type",
        ))),
        _ => Ok(true),
    }
}
