//! Cluster-pair registry contract.
//!
//! A cluster pair binds the local cluster to a destination cluster. The
//! registry resolves a pair name to readiness (storage side and scheduler
//! side are tracked separately) and to a client configuration for the
//! destination.

use async_trait::async_trait;

use crate::controller::error::Result;

/// Readiness of one side of a cluster pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterPairStatus {
    Pending,
    Ready,
    NotReady,
    Error,
}

impl std::fmt::Display for ClusterPairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPairStatus::Pending => write!(f, "Pending"),
            ClusterPairStatus::Ready => write!(f, "Ready"),
            ClusterPairStatus::NotReady => write!(f, "NotReady"),
            ClusterPairStatus::Error => write!(f, "Error"),
        }
    }
}

/// Resolves cluster-pair names to readiness and destination credentials.
#[async_trait]
pub trait ClusterPairRegistry: Send + Sync {
    /// Readiness of the storage side of the pair.
    async fn storage_status(&self, name: &str, namespace: &str) -> Result<ClusterPairStatus>;

    /// Readiness of the scheduler side of the pair.
    async fn scheduler_status(&self, name: &str, namespace: &str) -> Result<ClusterPairStatus>;

    /// Client configuration for the destination cluster.
    async fn scheduler_config(&self, name: &str, namespace: &str) -> Result<kube::Config>;
}
