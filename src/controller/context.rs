//! Shared context for the controller.
//!
//! The Context holds the Kubernetes client, the event reporter identity and
//! the injected collaborators (volume driver, rule engine, cluster-pair
//! registry). It is built once at startup and read-only thereafter.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use kube::api::{Patch, PatchParams};

use crate::clusterpair::ClusterPairRegistry;
use crate::controller::error::{Error, Result};
use crate::crd::Migration;
use crate::driver::VolumeDriver;
use crate::rules::RuleExecutor;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "migration-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for the local cluster
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Storage driver performing the volume copy
    pub driver: Arc<dyn VolumeDriver>,
    /// Engine executing pre/post rules
    pub rules: Arc<dyn RuleExecutor>,
    /// Resolver for cluster-pair readiness and credentials
    pub cluster_pairs: Arc<dyn ClusterPairRegistry>,
    /// Namespace whose Migrations may target arbitrary namespaces
    pub admin_namespace: String,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        driver: Arc<dyn VolumeDriver>,
        rules: Arc<dyn RuleExecutor>,
        cluster_pairs: Arc<dyn ClusterPairRegistry>,
        admin_namespace: String,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            driver,
            rules,
            cluster_pairs,
            admin_namespace,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a Migration
    pub async fn publish_normal_event(
        &self,
        migration: &Migration,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = migration.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a Migration
    pub async fn publish_warning_event(
        &self,
        migration: &Migration,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = migration.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }

    /// Persist the Migration's status through the status subresource.
    ///
    /// Stage and resource-list changes must be persisted before the
    /// reconciler returns so a crash-then-resync replays from a valid state.
    pub async fn update_migration_status(&self, migration: &Migration) -> Result<()> {
        let name = migration.name_any();
        let namespace = migration
            .namespace()
            .ok_or_else(|| Error::Validation("Migration has no namespace".to_string()))?;
        let api: Api<Migration> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({
            "status": migration.status,
        });
        api.patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
