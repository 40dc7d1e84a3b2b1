//! Migration Custom Resource Definition.
//!
//! A Migration declares which namespaces should be moved to the destination
//! cluster of a named cluster pair, and tracks per-volume and per-resource
//! progress in its status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation holding the pre-migration replica count of a Deployment or
/// StatefulSet that was applied with its replicas scaled to zero.
pub const MIGRATION_REPLICAS_ANNOTATION: &str = "stork.libopenstorage.org/migrationReplicas";

/// Migration is a custom resource describing a cross-cluster migration.
///
/// Example:
/// ```yaml
/// apiVersion: stork.libopenstorage.org/v1alpha1
/// kind: Migration
/// metadata:
///   name: team-a-migration
///   namespace: team-a
/// spec:
///   clusterPair: pair-east-west
///   namespaces:
///     - team-a
///   includeVolumes: true
///   includeResources: true
///   startApplications: false
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "stork.libopenstorage.org",
    version = "v1alpha1",
    kind = "Migration",
    plural = "migrations",
    shortname = "mig",
    status = "MigrationStatus",
    namespaced,
    printcolumn = r#"{"name":"Stage", "type":"string", "jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Name of the ClusterPair to migrate to. Required.
    pub cluster_pair: String,

    /// Namespaces whose contents should be migrated. Outside the admin
    /// namespace a Migration may only list its own namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label selectors applied when listing migratable resources.
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,

    /// Whether persistent volumes are migrated (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_volumes: Option<bool>,

    /// Whether resource manifests are migrated (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_resources: Option<bool>,

    /// Whether applications start on the destination with their original
    /// replica counts (default false: replicas are scaled to zero and the
    /// original count recorded in an annotation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_applications: Option<bool>,

    /// Rule executed in each namespace before volumes are migrated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_exec_rule: Option<String>,

    /// Rule executed in each namespace after volume migration is triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_exec_rule: Option<String>,
}

impl MigrationSpec {
    /// Fill unset optional fields with their documented defaults.
    pub fn apply_defaults(&mut self) {
        self.include_volumes.get_or_insert(true);
        self.include_resources.get_or_insert(true);
        self.start_applications.get_or_insert(false);
    }

    /// The configured pre-exec rule, treating an empty string as unset.
    pub fn pre_rule(&self) -> Option<&str> {
        self.pre_exec_rule.as_deref().filter(|r| !r.is_empty())
    }

    /// The configured post-exec rule, treating an empty string as unset.
    pub fn post_rule(&self) -> Option<&str> {
        self.post_exec_rule.as_deref().filter(|r| !r.is_empty())
    }
}

/// Status of a Migration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Current stage of the migration lifecycle.
    #[serde(default)]
    pub stage: MigrationStage,

    /// Overall state within the current stage.
    #[serde(default)]
    pub status: MigrationState,

    /// Per-volume progress as reported by the volume driver. `None` until
    /// the volume stage has been entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,

    /// Per-resource outcomes, populated during discovery before any remote
    /// apply happens.
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
}

impl Migration {
    /// Current stage, defaulting to Initial when no status exists yet.
    pub fn stage(&self) -> MigrationStage {
        self.status.as_ref().map(|s| s.stage).unwrap_or_default()
    }

    /// Current state, defaulting to Initial when no status exists yet.
    pub fn state(&self) -> MigrationState {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    /// Mutable status, created on first access.
    pub fn ensure_status(&mut self) -> &mut MigrationStatus {
        self.status.get_or_insert_with(MigrationStatus::default)
    }
}

/// Coarse-grained phase of a Migration's lifecycle.
///
/// Stages advance monotonically except for one permitted regression: a
/// rule-execution or readiness failure while entering the volume stage
/// resets to Initial so the pre-exec rule reruns on the next pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MigrationStage {
    /// No work done yet; namespaces and rules are validated here.
    #[default]
    Initial,
    /// Pre-exec rules are being launched in the target namespaces.
    PreExecRule,
    /// The volume driver is copying persistent volumes.
    Volumes,
    /// Resource manifests are being collected, transformed and applied.
    Applications,
    /// Terminal; subsequent events are no-ops other than deletion.
    Final,
}

impl std::fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStage::Initial => write!(f, "Initial"),
            MigrationStage::PreExecRule => write!(f, "PreExecRule"),
            MigrationStage::Volumes => write!(f, "Volumes"),
            MigrationStage::Applications => write!(f, "Applications"),
            MigrationStage::Final => write!(f, "Final"),
        }
    }
}

/// Fine-grained state of the Migration, a volume, or a resource.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MigrationState {
    #[default]
    Initial,
    Pending,
    InProgress,
    Successful,
    PartialSuccess,
    Failed,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Initial => write!(f, "Initial"),
            MigrationState::Pending => write!(f, "Pending"),
            MigrationState::InProgress => write!(f, "InProgress"),
            MigrationState::Successful => write!(f, "Successful"),
            MigrationState::PartialSuccess => write!(f, "PartialSuccess"),
            MigrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress of one persistent volume, produced by the volume driver.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    /// Driver-level volume identifier.
    pub volume: String,
    /// Namespace of the claim bound to this volume.
    pub namespace: String,
    /// Name of the claim bound to this volume.
    #[serde(rename = "persistentVolumeClaim")]
    pub pvc: String,
    /// Migration state of this volume.
    #[serde(default)]
    pub status: MigrationState,
    /// Human-readable detail for the current state.
    #[serde(default)]
    pub reason: String,
}

/// Outcome of migrating one API object. Identity is the full
/// (group, version, kind, namespace, name) tuple; the unnamed core group is
/// represented as `"core"`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: MigrationState,
    #[serde(default)]
    pub reason: String,
}
