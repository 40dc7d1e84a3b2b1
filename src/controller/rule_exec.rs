//! Pre/post rule orchestration.
//!
//! Pre-exec rules run in every target namespace before the volume cutover
//! and may fork background helpers whose termination signals are handed to
//! the volume stage. Post-exec rules run synchronously once the driver has
//! accepted the migration.

use kube::Api;
use kube::api::ListParams;
use tracing::warn;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{Migration, MigrationStage, MigrationState};
use crate::rules::{RuleExecutor, RulePhase, TerminationChannels};

/// What the pre-rule stage should do on this pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreRuleStep {
    /// No rule configured; move straight to the volume stage.
    SkipToVolumes,
    /// Mark the stage in progress and launch the rules.
    Launch,
    /// Rules were already launched by an earlier pass; wait for the next
    /// resync.
    Wait,
}

/// Decide the pre-rule action from the persisted stage and state.
pub fn pre_rule_step(stage: MigrationStage, state: MigrationState, has_rule: bool) -> PreRuleStep {
    if !has_rule {
        return PreRuleStep::SkipToVolumes;
    }
    if stage == MigrationStage::PreExecRule && state == MigrationState::InProgress {
        return PreRuleStep::Wait;
    }
    PreRuleStep::Launch
}

/// Outcome of running the pre-rule stage.
pub enum PreExecOutcome {
    /// Rules launched (or none configured); carry the termination signals
    /// into the volume stage.
    Proceed(TerminationChannels),
    /// Still waiting on a previously launched rule; end this pass.
    Wait,
}

/// Run the pre-exec rule for every namespace in the spec.
///
/// On any namespace failure, signals already collected are fired (the
/// `TerminationChannels` drop guard handles the unwind) and the error is
/// propagated; the caller resets the stage so the rule reruns next pass.
pub async fn run_pre_exec_rule(migration: &mut Migration, ctx: &Context) -> Result<PreExecOutcome> {
    let step = pre_rule_step(
        migration.stage(),
        migration.state(),
        migration.spec.pre_rule().is_some(),
    );

    match step {
        PreRuleStep::SkipToVolumes => {
            let status = migration.ensure_status();
            status.stage = MigrationStage::Volumes;
            status.status = MigrationState::Pending;
            ctx.update_migration_status(migration).await?;
            return Ok(PreExecOutcome::Proceed(TerminationChannels::new()));
        }
        PreRuleStep::Wait => {
            let rule = migration.spec.pre_rule().unwrap_or_default().to_string();
            ctx.publish_normal_event(
                migration,
                &MigrationState::InProgress.to_string(),
                "ExecutingPreRule",
                Some(format!("Waiting for PreExecRule {rule}")),
            )
            .await;
            return Ok(PreExecOutcome::Wait);
        }
        PreRuleStep::Launch => {
            let status = migration.ensure_status();
            status.stage = MigrationStage::PreExecRule;
            status.status = MigrationState::InProgress;
            ctx.update_migration_status(migration).await?;
        }
    }

    let rule_name = migration
        .spec
        .pre_rule()
        .unwrap_or_default()
        .to_string();
    let mut channels = TerminationChannels::new();
    for ns in &migration.spec.namespaces {
        // An early return drops `channels`, firing any helper already
        // started in a previous namespace.
        let rule = ctx.rules.get_rule(&rule_name, ns).await?;
        match ctx
            .rules
            .execute_rule(&rule, RulePhase::Pre, migration, ns)
            .await
        {
            Ok(Some(signal)) => channels.push(signal),
            Ok(None) => {}
            Err(e) => {
                return Err(Error::Rule(format!(
                    "Error executing PreExecRule for namespace {ns}: {e}"
                )));
            }
        }
    }
    Ok(PreExecOutcome::Proceed(channels))
}

/// Run the post-exec rule synchronously in every namespace.
pub async fn run_post_exec_rule(migration: &Migration, ctx: &Context) -> Result<()> {
    let Some(rule_name) = migration.spec.post_rule() else {
        return Ok(());
    };
    for ns in &migration.spec.namespaces {
        let rule = ctx.rules.get_rule(rule_name, ns).await?;
        ctx.rules
            .execute_rule(&rule, RulePhase::Post, migration, ns)
            .await
            .map_err(|e| {
                Error::Rule(format!(
                    "Error executing PostExecRule for namespace {ns}: {e}"
                ))
            })?;
    }
    Ok(())
}

/// Terminate rule state orphaned by a controller restart.
///
/// Every Migration gets a recovery attempt regardless of earlier failures;
/// the last error, if any, is returned.
pub async fn recover_rules(client: &kube::Client, rules: &dyn RuleExecutor) -> Result<()> {
    let api: Api<Migration> = Api::all(client.clone());
    let migrations = api.list(&ListParams::default()).await?;

    let mut last_error = None;
    for migration in migrations {
        if let Err(e) = rules.perform_rule_recovery(&migration).await {
            warn!(
                migration = %migration.metadata.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to recover rules for migration"
            );
            last_error = Some(e);
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
