//! Kubernetes integration.
//!
//! - [`KubeStore`]: the store capabilities backed by the API server
//! - [`PoolKind`]: per-kind API access for the two pool resources
//! - [`merge_patch`]: JSON merge patch between two object snapshots

pub mod pool_kind;
pub mod store;
pub mod types;

pub use pool_kind::PoolKind;
pub use store::merge_patch;
pub use store::KubeStore;
pub use types::KubernetesError;
