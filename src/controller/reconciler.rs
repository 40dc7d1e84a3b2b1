//! Reconciliation loop for Migration objects.
//!
//! Each event applies spec defaults, enforces the namespace-scoping policy
//! and dispatches on the persisted stage. Stage handlers persist status
//! before returning, so a crash-then-resync replays from a valid state.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::controller::resources;
use crate::controller::rule_exec::{self, PreExecOutcome};
use crate::controller::volumes;
use crate::crd::{Migration, MigrationStage, MigrationState};
use crate::rules::TerminationChannels;

/// Finalizer guaranteeing the driver's volume work is cancelled on delete
pub const FINALIZER: &str = "stork.libopenstorage.org/migration-finalizer";

/// Synthetic-event period advancing long-running stages
pub const RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Whether a deletion event still needs the driver's volume work cancelled.
///
/// The finalizer is released only after a successful cancel, so its absence
/// means an earlier event already cancelled; redelivered deletion events
/// must not cancel again.
pub fn deletion_requires_cancel(has_finalizer: bool) -> bool {
    has_finalizer
}

/// Whether the Migration's namespace list is allowed.
///
/// Outside the admin namespace a Migration may only migrate its own
/// namespace.
pub fn namespace_migration_allowed(migration: &Migration, admin_namespace: &str) -> bool {
    let namespace = migration.namespace().unwrap_or_default();
    if namespace != admin_namespace {
        return migration.spec.namespaces.iter().all(|ns| *ns == namespace);
    }
    true
}

/// Reconcile a Migration
pub async fn reconcile(obj: Arc<Migration>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling Migration");

    let api: Api<Migration> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let mut migration = (*obj).clone();
    migration.spec.apply_defaults();

    if migration.spec.cluster_pair.is_empty() {
        let message = "clusterPair to migrate to cannot be empty";
        error!(name = %name, "{message}");
        ctx.publish_warning_event(
            &migration,
            &MigrationState::Failed.to_string(),
            "Validating",
            Some(message.to_string()),
        )
        .await;
        return Ok(Action::requeue(RESYNC_PERIOD));
    }

    // Check whether the namespaces are allowed to be migrated before every
    // stage.
    if !namespace_migration_allowed(&migration, &ctx.admin_namespace) {
        let message = "Spec.Namespaces should only contain the current namespace";
        error!(name = %name, "{message}");
        ctx.publish_warning_event(
            &migration,
            &MigrationState::Failed.to_string(),
            "Validating",
            Some(message.to_string()),
        )
        .await;
        return Ok(Action::requeue(RESYNC_PERIOD));
    }

    let stage = migration.stage();
    match stage {
        MigrationStage::Initial | MigrationStage::PreExecRule => {
            if stage == MigrationStage::Initial && !validate_initial(&mut migration, &ctx).await? {
                return Ok(Action::requeue(RESYNC_PERIOD));
            }

            let channels = match rule_exec::run_pre_exec_rule(&mut migration, &ctx).await {
                Ok(PreExecOutcome::Proceed(channels)) => channels,
                Ok(PreExecOutcome::Wait) => return Ok(Action::requeue(RESYNC_PERIOD)),
                Err(e) => {
                    let message = format!("Error running PreExecRule: {e}");
                    error!(name = %name, "{message}");
                    ctx.publish_warning_event(
                        &migration,
                        &MigrationState::Failed.to_string(),
                        "ExecutingPreRule",
                        Some(message),
                    )
                    .await;
                    // Reset so the pre-rule retriggers on the next cycle.
                    let status = migration.ensure_status();
                    status.stage = MigrationStage::Initial;
                    status.status = MigrationState::Initial;
                    ctx.update_migration_status(&migration).await?;
                    return Ok(Action::requeue(RESYNC_PERIOD));
                }
            };

            run_volume_stage(&mut migration, &ctx, channels).await?;
        }
        MigrationStage::Volumes => {
            run_volume_stage(&mut migration, &ctx, TerminationChannels::new()).await?;
        }
        MigrationStage::Applications => {
            if let Err(e) = resources::migrate_resources(&mut migration, &ctx).await {
                let message = format!("Error migrating resources: {e}");
                error!(name = %name, "{message}");
                ctx.publish_warning_event(
                    &migration,
                    &MigrationState::Failed.to_string(),
                    "MigratingResources",
                    Some(message),
                )
                .await;
                if !e.is_user_error() {
                    return Err(e);
                }
            }
        }
        MigrationStage::Final => {
            return Ok(Action::await_change());
        }
    }

    Ok(Action::requeue(RESYNC_PERIOD))
}

/// Run the volume stage, or skip straight to Applications when volumes are
/// excluded.
async fn run_volume_stage(
    migration: &mut Migration,
    ctx: &Context,
    channels: TerminationChannels,
) -> Result<(), Error> {
    if migration.spec.include_volumes.unwrap_or(true) {
        if let Err(e) = volumes::migrate_volumes(migration, ctx, channels).await {
            let message = format!("Error migrating volumes: {e}");
            error!(
                name = %migration.metadata.name.as_deref().unwrap_or_default(),
                "{message}"
            );
            ctx.publish_warning_event(
                migration,
                &MigrationState::Failed.to_string(),
                "MigratingVolumes",
                Some(message),
            )
            .await;
            if !e.is_user_error() {
                return Err(e);
            }
        }
    } else {
        let status = migration.ensure_status();
        status.stage = MigrationStage::Applications;
        status.status = MigrationState::Initial;
        ctx.update_migration_status(migration).await?;
    }
    Ok(())
}

/// Validate namespaces and rule references before any work starts.
///
/// Returns false when this pass should stop: a missing namespace marks the
/// Migration Final/Failed, a missing rule leaves status untouched so the
/// user can correct the spec.
async fn validate_initial(migration: &mut Migration, ctx: &Context) -> Result<bool, Error> {
    let namespace_api: Api<k8s_openapi::api::core::v1::Namespace> =
        Api::all(ctx.client.clone());
    for ns in &migration.spec.namespaces {
        match namespace_api.get(ns).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let message = format!("Error getting namespace {ns}: not found");
                error!("{message}");
                {
                    let status = migration.ensure_status();
                    status.stage = MigrationStage::Final;
                    status.status = MigrationState::Failed;
                }
                ctx.publish_warning_event(
                    migration,
                    &MigrationState::Failed.to_string(),
                    "Validating",
                    Some(message),
                )
                .await;
                ctx.update_migration_status(migration).await?;
                return Ok(false);
            }
            Err(e) => return Err(Error::Kube(e)),
        }
    }

    let migration_namespace = migration.namespace().unwrap_or_default();
    for (field, rule) in [
        ("PreExecRule", migration.spec.pre_rule()),
        ("PostExecRule", migration.spec.post_rule()),
    ] {
        let Some(rule_name) = rule else { continue };
        if let Err(e) = ctx.rules.get_rule(rule_name, &migration_namespace).await {
            let message = format!("Error getting {field} {rule_name}: {e}");
            error!("{message}");
            ctx.publish_warning_event(
                migration,
                &MigrationState::Failed.to_string(),
                "Validating",
                Some(message),
            )
            .await;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Handle deletion of a Migration: cancel the driver's volume work, then
/// release the finalizer.
async fn handle_deletion(
    migration: &Migration,
    ctx: &Context,
    api: &Api<Migration>,
) -> Result<Action, Error> {
    let name = migration.name_any();
    let has_finalizer = migration.finalizers().iter().any(|f| f == FINALIZER);
    if deletion_requires_cancel(has_finalizer) {
        info!(name = %name, "Cancelling migration on deletion");
        ctx.driver.cancel_migration(migration).await?;
        remove_finalizer(api, &name).await?;
    }
    Ok(Action::await_change())
}

/// Add finalizer to a Migration
async fn add_finalizer(api: &Api<Migration>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": [FINALIZER]
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Remove finalizer from a Migration
async fn remove_finalizer(api: &Api<Migration>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": null
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Migration>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if error.is_not_found() {
        debug!(name = %name, "Migration not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}
