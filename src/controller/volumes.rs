//! Volume migration stage.
//!
//! Delegates the storage-level copy to the volume driver and polls its
//! status across resyncs. Termination signals collected by the pre-rule
//! stage are fired once the driver has accepted the migration; the drop
//! guard on `TerminationChannels` covers every failure unwind.

use tracing::{error, info};

use crate::clusterpair::ClusterPairStatus;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::resources;
use crate::controller::rule_exec;
use crate::crd::{Migration, MigrationStage, MigrationState, VolumeInfo};
use crate::rules::TerminationChannels;

/// Summary of the driver-reported volume list.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VolumeClassification {
    pub any_in_progress: bool,
    pub any_failed: bool,
}

/// Classify the refreshed volume list. One failed volume fails the
/// Migration but does not cancel sibling volume migrations.
pub fn classify_volumes(volumes: &[VolumeInfo]) -> VolumeClassification {
    let mut classification = VolumeClassification::default();
    for info in volumes {
        match info.status {
            MigrationState::InProgress => classification.any_in_progress = true,
            MigrationState::Failed => classification.any_failed = true,
            _ => {}
        }
    }
    classification
}

/// Stage/state transition taken when no volume work remains.
pub fn volumes_exit(failed: bool, include_resources: bool) -> Option<(MigrationStage, MigrationState)> {
    if failed {
        // Failure was already recorded while classifying.
        return None;
    }
    if include_resources {
        Some((MigrationStage::Applications, MigrationState::InProgress))
    } else {
        Some((MigrationStage::Final, MigrationState::Successful))
    }
}

/// Run the volume stage for one reconciliation pass.
pub async fn migrate_volumes(
    migration: &mut Migration,
    ctx: &Context,
    mut channels: TerminationChannels,
) -> Result<()> {
    migration.ensure_status().stage = MigrationStage::Volumes;

    // First entry: trigger the driver if there is no volume status yet.
    if migration.status.as_ref().is_none_or(|s| s.volumes.is_none()) {
        let storage_status = ctx
            .cluster_pairs
            .storage_status(
                &migration.spec.cluster_pair,
                &migration.metadata.namespace.clone().unwrap_or_default(),
            )
            .await;

        let ready = matches!(storage_status, Ok(ClusterPairStatus::Ready));
        if !ready {
            // Reset the stage so a configured pre-rule retriggers on the
            // next cycle.
            if migration.spec.pre_rule().is_some() {
                migration.ensure_status().stage = MigrationStage::Initial;
                ctx.update_migration_status(migration).await?;
            }
            return Err(Error::NotReady(match storage_status {
                Ok(status) => format!("Cluster pair storage status is not ready. Status: {status}"),
                Err(e) => format!("Cluster pair storage status is not ready. Err: {e}"),
            }));
        }

        let volume_infos = ctx.driver.start_migration(migration).await?;
        {
            let status = migration.ensure_status();
            status.volumes = Some(volume_infos);
            status.status = MigrationState::InProgress;
        }
        ctx.update_migration_status(migration).await?;

        // The driver has the migration; stop any background rule helpers.
        channels.fire_all();

        if migration.spec.post_rule().is_some() {
            if let Err(e) = rule_exec::run_post_exec_rule(migration, ctx).await {
                let message = format!("Error running PostExecRule: {e}");
                error!(migration = %migration.metadata.name.as_deref().unwrap_or_default(), "{message}");
                ctx.publish_warning_event(
                    migration,
                    &MigrationState::Failed.to_string(),
                    "ExecutingPostRule",
                    Some(message),
                )
                .await;

                // A failed post-rule is fatal: cancel the driver's work and
                // finish as Failed.
                if let Err(cancel_err) = ctx.driver.cancel_migration(migration).await {
                    error!(error = %cancel_err, "Error cancelling migration");
                }
                let status = migration.ensure_status();
                status.stage = MigrationStage::Final;
                status.status = MigrationState::Failed;
                ctx.update_migration_status(migration).await?;
                return Err(e);
            }
        }
    }

    let mut in_progress = false;
    let has_volumes = migration
        .status
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|v| !v.is_empty());

    // Skip the status poll when no volumes are being migrated.
    if has_volumes {
        let volume_infos = ctx.driver.get_migration_status(migration).await?;
        migration.ensure_status().volumes = Some(volume_infos.clone());
        ctx.update_migration_status(migration).await?;

        for info in &volume_infos {
            match info.status {
                MigrationState::InProgress => {
                    info!(volume = %info.volume, "Volume migration still in progress");
                }
                MigrationState::Failed => {
                    ctx.publish_warning_event(
                        migration,
                        &info.status.to_string(),
                        "MigratingVolumes",
                        Some(format!(
                            "Error migrating volume {}: {}",
                            info.volume, info.reason
                        )),
                    )
                    .await;
                }
                MigrationState::Successful => {
                    ctx.publish_normal_event(
                        migration,
                        &info.status.to_string(),
                        "MigratingVolumes",
                        Some(format!("Volume {} migrated successfully", info.volume)),
                    )
                    .await;
                }
                _ => {}
            }
        }

        let classification = classify_volumes(&volume_infos);
        if classification.any_failed {
            let status = migration.ensure_status();
            status.stage = MigrationStage::Final;
            status.status = MigrationState::Failed;
        }
        in_progress = classification.any_in_progress;
    }

    // Wait for the next resync while any volume is still being copied.
    if in_progress {
        return Ok(());
    }

    let failed = migration.state() == MigrationState::Failed;
    let include_resources = migration.spec.include_resources.unwrap_or(true);
    if let Some((stage, state)) = volumes_exit(failed, include_resources) {
        {
            let status = migration.ensure_status();
            status.stage = stage;
            status.status = state;
        }
        if stage == MigrationStage::Applications {
            // Persist the stage advance before starting on resources.
            ctx.update_migration_status(migration).await?;
            resources::migrate_resources(migration, ctx).await?;
        }
    }

    ctx.update_migration_status(migration).await?;
    Ok(())
}
