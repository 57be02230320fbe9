//! Shared API type definitions
//!
//! This crate contains the custom resources reconciled by the pool operator:
//! [`GpuDevice`] (one physical card or MIG slice on a node), and the two pool
//! kinds [`GpuPool`] / [`ClusterGpuPool`] describing which devices a pool
//! claims and how its capacity is counted.

pub mod device;
pub mod pool;

pub use device::*;
pub use pool::*;

/// API group shared by every resource in this crate.
pub const API_GROUP: &str = "gpufleet.io";

/// Annotation naming the namespaced [`GpuPool`] that claims a device.
pub const POOL_ASSIGNMENT_ANNOTATION: &str = "gpufleet.io/pool";

/// Annotation naming the [`ClusterGpuPool`] that claims a device.
pub const CLUSTER_POOL_ASSIGNMENT_ANNOTATION: &str = "gpufleet.io/cluster-pool";

/// Devices labelled `gpufleet.io/ignore=true` are never selected into a pool.
pub const IGNORE_LABEL: &str = "gpufleet.io/ignore";

/// Whether a pool is namespaced or cluster-scoped.
///
/// The scope decides which annotation marks a device as claimed by the pool,
/// and therefore which field index is used to find the claimed devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentScope {
    Namespaced,
    Cluster,
}

impl AssignmentScope {
    pub fn annotation_key(self) -> &'static str {
        match self {
            AssignmentScope::Namespaced => POOL_ASSIGNMENT_ANNOTATION,
            AssignmentScope::Cluster => CLUSTER_POOL_ASSIGNMENT_ANNOTATION,
        }
    }
}

impl std::fmt::Display for AssignmentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
