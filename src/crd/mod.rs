//! Custom Resource Definitions for migration-operator.
//!
//! - `Migration`: user-declared intent to move a set of namespaces (volumes
//!   and resource manifests) to the destination cluster of a cluster pair.

mod migration;

pub use migration::*;
