//! Controller module for migration-operator.
//!
//! Contains the reconciliation loop, the per-stage handlers (rule
//! orchestration, volume migration, resource discovery/transform/apply),
//! error handling and the shared context.

pub mod apply;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod resources;
pub mod rule_exec;
pub mod transform;
pub mod volumes;
