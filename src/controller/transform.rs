//! Manifest transformations for portability between clusters.
//!
//! Every admitted object is stripped of its status and of metadata the
//! destination cluster must assign itself. A failure while preparing one
//! object marks only that object's ResourceInfo as Failed; the object is
//! dropped from the apply list and the rest continue.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::controller::apply;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{MIGRATION_REPLICAS_ANNOTATION, Migration, MigrationState};
use crate::unstructured;

/// Prepare every object in place; objects that fail preparation are marked
/// Failed and removed from the apply list.
pub async fn prepare_resources(
    migration: &mut Migration,
    ctx: &Context,
    objects: &mut Vec<DynamicObject>,
) -> Result<()> {
    let mut prepared = Vec::with_capacity(objects.len());
    for mut object in objects.drain(..) {
        match prepare_object(migration, ctx, &mut object).await {
            Ok(()) => prepared.push(object),
            Err(e) => {
                apply::update_resource_status(
                    migration,
                    ctx,
                    &object,
                    MigrationState::Failed,
                    format!("Error preparing resource: {e}"),
                )
                .await;
            }
        }
    }
    *objects = prepared;
    Ok(())
}

async fn prepare_object(
    migration: &Migration,
    ctx: &Context,
    object: &mut DynamicObject,
) -> Result<()> {
    strip_status(object);

    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    match kind.as_str() {
        "PersistentVolume" => prepare_pv_resource(ctx, object).await?,
        "Service" => prepare_service_resource(object)?,
        "Deployment" | "StatefulSet" => prepare_application_resource(migration, object)?,
        _ => {}
    }

    prune_metadata(object);
    Ok(())
}

/// Status never migrates between clusters.
pub fn strip_status(object: &mut DynamicObject) {
    if let Some(content) = object.data.as_object_mut() {
        content.remove("status");
    }
}

/// Drop the source cluster's claim binding and storage class; the driver
/// then applies its own rewrites (volume handles and the like).
async fn prepare_pv_resource(ctx: &Context, object: &mut DynamicObject) -> Result<()> {
    let spec = unstructured::get_map_mut(&mut object.data, "spec")
        .ok_or_else(|| Error::Validation("PersistentVolume has no spec".to_string()))?;
    spec.remove("claimRef");
    spec.remove("storageClassName");

    *object = ctx
        .driver
        .update_migrated_persistent_volume_spec(object.clone())
        .await?;
    Ok(())
}

/// Drop the allocated clusterIP so the destination assigns its own, keeping
/// headless services headless.
pub fn prepare_service_resource(object: &mut DynamicObject) -> Result<()> {
    let spec = unstructured::get_map_mut(&mut object.data, "spec")
        .ok_or_else(|| Error::Validation("Service has no spec".to_string()))?;
    if let Some(Value::String(cluster_ip)) = spec.get("clusterIP")
        && cluster_ip != "None"
    {
        spec.remove("clusterIP");
    }
    Ok(())
}

/// Scale the application to zero on the destination, recording the original
/// replica count in an annotation, unless applications should start.
pub fn prepare_application_resource(
    migration: &Migration,
    object: &mut DynamicObject,
) -> Result<()> {
    if migration.spec.start_applications.unwrap_or(false) {
        return Ok(());
    }

    let spec = unstructured::get_map_mut(&mut object.data, "spec")
        .ok_or_else(|| Error::Validation("application has no spec".to_string()))?;
    let replicas = spec
        .get("replicas")
        .and_then(unstructured::as_integer)
        .ok_or_else(|| Error::Validation("spec.replicas is not an integer".to_string()))?;
    spec.insert("replicas".to_string(), Value::from(0));

    object
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(MIGRATION_REPLICAS_ANNOTATION.to_string(), replicas.to_string());
    Ok(())
}

/// Keep only the metadata the destination cluster should see.
pub fn prune_metadata(object: &mut DynamicObject) {
    let metadata = &mut object.metadata;
    *metadata = ObjectMeta {
        name: metadata.name.take(),
        namespace: metadata.namespace.take(),
        labels: metadata.labels.take(),
        annotations: metadata.annotations.take(),
        ..ObjectMeta::default()
    };
}
