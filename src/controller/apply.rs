//! Remote apply of prepared resources.
//!
//! Creates the prepared objects on the destination cluster through a
//! dynamic client, pre-creating the target namespaces. Conflicts are
//! resolved by delete-and-recreate, except for volume-bearing kinds which
//! are never deleted on the destination.

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::{Api, Client, ResourceExt};
use tracing::{error, info};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{Migration, MigrationState, ResourceInfo};

/// Error-message sentinel for a Service whose fixed nodePort is taken.
const PORT_ALLOCATED_MESSAGE: &str = "provided port is already allocated";

/// Dynamic resource name for a kind.
pub fn plural_name(kind: &str) -> String {
    format!("{}s", kind.to_lowercase())
}

/// Whether a create failure means the object already exists on the
/// destination (AlreadyExists, or the port-allocator sentinel for Services
/// with fixed nodePorts).
pub fn is_existing_object_error(err: &kube::Error) -> bool {
    if let kube::Error::Api(response) = err
        && response.code == 409
    {
        return true;
    }
    err.to_string().contains(PORT_ALLOCATED_MESSAGE)
}

/// Volume-bearing kinds are never deleted on the destination.
pub fn retains_destination_object(kind: &str) -> bool {
    matches!(kind, "PersistentVolumeClaim" | "PersistentVolume")
}

/// Group/version/kind of a collected object, with the blank core group.
pub fn object_gvk(object: &DynamicObject) -> Option<(String, String, String)> {
    let types = object.types.as_ref()?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Some((group, version, types.kind.clone()))
}

/// Find the ResourceInfo matching an object's full identity tuple; a blank
/// wire group matches `"core"`.
pub fn find_resource_info<'a>(
    resources: &'a mut [ResourceInfo],
    group: &str,
    version: &str,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Option<&'a mut ResourceInfo> {
    resources.iter_mut().find(|resource| {
        resource.name == name
            && resource.namespace == namespace
            && (resource.group == group || (resource.group == "core" && group.is_empty()))
            && resource.version == version
            && resource.kind == kind
    })
}

/// Overall state once every object has been processed.
pub fn applications_state(resources: &[ResourceInfo]) -> MigrationState {
    if resources
        .iter()
        .any(|resource| resource.status != MigrationState::Successful)
    {
        MigrationState::PartialSuccess
    } else {
        MigrationState::Successful
    }
}

/// Record the outcome of one object in its ResourceInfo and publish the
/// matching event.
pub async fn update_resource_status(
    migration: &mut Migration,
    ctx: &Context,
    object: &DynamicObject,
    status: MigrationState,
    reason: String,
) {
    let Some((group, version, kind)) = object_gvk(object) else {
        return;
    };
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_default();

    let mut event = None;
    if let Some(resources) = migration.status.as_mut().map(|s| &mut s.resources)
        && let Some(resource) =
            find_resource_info(resources, &group, &version, &kind, &namespace, &name)
    {
        resource.status = status;
        resource.reason = reason.clone();
        event = Some(format!(
            "{}/{} {} {}/{}: {}",
            resource.group, resource.version, resource.kind, namespace, name, reason
        ));
    }

    if let Some(message) = event {
        let reason_str = status.to_string();
        if status == MigrationState::Failed {
            ctx.publish_warning_event(migration, &reason_str, "MigratingResources", Some(message))
                .await;
        } else {
            ctx.publish_normal_event(migration, &reason_str, "MigratingResources", Some(message))
                .await;
        }
    }
}

/// Apply every prepared object on the destination cluster.
pub async fn apply_resources(
    migration: &mut Migration,
    ctx: &Context,
    objects: &[DynamicObject],
) -> Result<()> {
    let namespace = migration.metadata.namespace.clone().unwrap_or_default();
    let remote_config = ctx
        .cluster_pairs
        .scheduler_config(&migration.spec.cluster_pair, &namespace)
        .await?;
    let remote_client = Client::try_from(remote_config)?;

    create_remote_namespaces(migration, ctx, &remote_client).await?;

    for object in objects {
        let Some((group, version, kind)) = object_gvk(object) else {
            update_resource_status(
                migration,
                ctx,
                object,
                MigrationState::Failed,
                "Object has no type information".to_string(),
            )
            .await;
            continue;
        };

        let api_resource = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(&group, &version, &kind),
            &plural_name(&kind),
        );
        let api: Api<DynamicObject> = match object.namespace() {
            Some(ns) => Api::namespaced_with(remote_client.clone(), &ns, &api_resource),
            None => Api::all_with(remote_client.clone(), &api_resource),
        };
        let name = object.name_any();

        info!(kind = %kind, name = %name, "Applying resource");
        let mut outcome = api
            .create(&PostParams::default(), object)
            .await
            .map(|_| ());

        if let Err(create_err) = &outcome
            && is_existing_object_error(create_err)
        {
            if retains_destination_object(&kind) {
                outcome = Ok(());
            } else {
                // Replace whatever is on the destination and try again.
                match api.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {
                        outcome = api
                            .create(&PostParams::default(), object)
                            .await
                            .map(|_| ());
                    }
                    Err(delete_err) => {
                        error!(
                            kind = %kind,
                            name = %name,
                            error = %delete_err,
                            "Error deleting resource during migrate"
                        );
                        outcome = Err(delete_err);
                    }
                }
            }
        }

        match outcome {
            Ok(()) => {
                update_resource_status(
                    migration,
                    ctx,
                    object,
                    MigrationState::Successful,
                    "Resource migrated successfully".to_string(),
                )
                .await;
            }
            Err(e) => {
                update_resource_status(
                    migration,
                    ctx,
                    object,
                    MigrationState::Failed,
                    format!("Error applying resource: {e}"),
                )
                .await;
            }
        }
    }
    Ok(())
}

/// Pre-create every target namespace on the destination, carrying over the
/// source namespace's labels and annotations.
async fn create_remote_namespaces(
    migration: &Migration,
    ctx: &Context,
    remote_client: &Client,
) -> Result<()> {
    let local: Api<Namespace> = Api::all(ctx.client.clone());
    let remote: Api<Namespace> = Api::all(remote_client.clone());

    for ns in &migration.spec.namespaces {
        let namespace = local.get(ns).await?;
        if remote.get(ns).await.is_ok() {
            continue;
        }

        let remote_namespace = Namespace {
            metadata: ObjectMeta {
                name: namespace.metadata.name.clone(),
                labels: namespace.metadata.labels.clone(),
                annotations: namespace.metadata.annotations.clone(),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match remote.create(&PostParams::default(), &remote_namespace).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(Error::Kube(e)),
        }
    }
    Ok(())
}
