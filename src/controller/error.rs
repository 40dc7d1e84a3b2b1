//! Error types for the migration controller.
//!
//! Variants map onto the handling taxonomy: validation and readiness errors
//! are reported through events and swallowed, driver and infrastructure
//! errors propagate so the controller requeues.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// User error in the Migration spec or referenced objects
    #[error("Validation error: {0}")]
    Validation(String),

    /// A cluster-pair side is not ready yet; retried on the next resync
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Volume driver error
    #[error("Volume driver error: {0}")]
    Driver(String),

    /// Rule engine error
    #[error("Rule error: {0}")]
    Rule(String),

    /// Cluster-pair registry error
    #[error("Cluster pair error: {0}")]
    ClusterPair(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Errors the user must fix or that clear on their own; the framework
    /// should not back off on these.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotReady(_))
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::NotReady(_) | Error::Driver(_) | Error::Rule(_) | Error::ClusterPair(_) => true,
            Error::Validation(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(3600)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
