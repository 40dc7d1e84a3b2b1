//! Volume driver contract.
//!
//! The driver performs the storage-level copy of persistent volumes and
//! owns PVC identity. Volume migration is asynchronous: `start_migration`
//! kicks it off and `get_migration_status` is polled across resyncs until
//! every volume settles.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;

use crate::controller::error::Result;
use crate::crd::{Migration, VolumeInfo};

/// Pluggable storage driver capability set.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Begin migrating the volumes selected by the Migration. Returns the
    /// initial per-volume status list (possibly empty).
    async fn start_migration(&self, migration: &Migration) -> Result<Vec<VolumeInfo>>;

    /// Refresh the per-volume status list for an in-flight migration.
    async fn get_migration_status(&self, migration: &Migration) -> Result<Vec<VolumeInfo>>;

    /// Abort the migration's outstanding volume work.
    async fn cancel_migration(&self, migration: &Migration) -> Result<()>;

    /// Whether this driver provisions the given claim.
    fn owns_pvc(&self, pvc: &PersistentVolumeClaim) -> bool;

    /// Driver-specific rewrites of a PersistentVolume manifest bound for
    /// the destination cluster (volume handle rewriting and the like).
    async fn update_migrated_persistent_volume_spec(
        &self,
        object: DynamicObject,
    ) -> Result<DynamicObject>;
}
