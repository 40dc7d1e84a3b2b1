//! migration-operator library crate
//!
//! A reconciling control loop that migrates application workloads (their
//! persistent volumes and declarative resource manifests) from the local
//! cluster to the destination cluster of a named cluster pair.
//!
//! The crate is embedded into a host operator process which injects the
//! three collaborators: a [`driver::VolumeDriver`] performing the storage
//! copy, a [`rules::RuleExecutor`] running pre/post hooks, and a
//! [`clusterpair::ClusterPairRegistry`] resolving pair readiness and
//! destination credentials.

pub mod clusterpair;
pub mod controller;
pub mod crd;
pub mod driver;
pub mod rules;
pub mod unstructured;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, CustomResourceExt};
use tracing::{debug, error, info};

use clusterpair::ClusterPairRegistry;
use controller::context::{Context, FIELD_MANAGER};
use controller::error::{Error, Result};
use controller::reconciler::{error_policy, reconcile};
use controller::rule_exec;
use crd::Migration;
use driver::VolumeDriver;
use rules::RuleExecutor;

/// How long to wait for the Migration CRD to become Established
const CRD_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Register the Migration CRD and wait for it to be Established.
pub async fn ensure_crd(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = Migration::crd();
    let name = crd
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "migrations.stork.libopenstorage.org".to_string());

    crds.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&crd),
    )
    .await?;

    let establish = await_condition(crds, &name, conditions::is_crd_established());
    tokio::time::timeout(CRD_ESTABLISH_TIMEOUT, establish)
        .await
        .map_err(|_| {
            Error::NotReady(format!("Timed out waiting for CRD {name} to be established"))
        })?
        .map_err(|e| Error::NotReady(format!("Error waiting for CRD {name}: {e}")))?;

    info!(crd = %name, "Migration CRD established");
    Ok(())
}

/// Run the migration controller.
///
/// Registers the CRD, recovers rule state orphaned by a previous instance
/// and then watches Migration objects cluster-wide. The watch delivers
/// events serialized per object; long-running stages are advanced by the
/// requeue-based resync.
pub async fn run_controller(
    client: Client,
    driver: Arc<dyn VolumeDriver>,
    rules: Arc<dyn RuleExecutor>,
    cluster_pairs: Arc<dyn ClusterPairRegistry>,
    admin_namespace: impl Into<String>,
) -> Result<()> {
    ensure_crd(&client).await?;

    if let Err(e) = rule_exec::recover_rules(&client, rules.as_ref()).await {
        error!(error = %e, "Failed to perform recovery for migration rules");
        return Err(e);
    }

    let admin_namespace = admin_namespace.into();
    info!(admin_namespace = %admin_namespace, "Starting controller for Migration resources");

    let ctx = Arc::new(Context::new(
        client.clone(),
        driver,
        rules,
        cluster_pairs,
        admin_namespace,
    ));

    let migrations: Api<Migration> = Api::all(client);
    Controller::new(migrations, watcher::Config::default().any_semantic())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Not-found errors are expected after deletion when a
                    // queued event fires for a gone object.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Migration no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
    Ok(())
}
