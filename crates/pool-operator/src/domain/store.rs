//! Narrow store capabilities consumed by the selection core.
//!
//! The core never talks to the API server directly. It reads and writes
//! through these traits, implemented by [`crate::infrastructure::k8s::KubeStore`]
//! in production and by an in-memory fake in tests.

use core::error::Error;

use api_types::AssignmentScope;
use api_types::GpuDevice;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;

/// Errors surfaced by a store.
///
/// `NotFound` and `Conflict` are distinguishable so callers can swallow the
/// former and retry the latter.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum StoreError {
    #[display("object not found: {name}")]
    NotFound { name: String },
    #[display("write conflict on {name}: object was modified concurrently")]
    Conflict { name: String },
    #[display("store request failed: {message}")]
    Api { message: String },
    #[display("operation cancelled")]
    Cancelled,
}

impl Error for StoreError {}

pub trait StoreErrorExt {
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
}

impl StoreErrorExt for Report<StoreError> {
    fn is_not_found(&self) -> bool {
        matches!(self.current_context(), StoreError::NotFound { .. })
    }

    fn is_conflict(&self) -> bool {
        matches!(self.current_context(), StoreError::Conflict { .. })
    }
}

/// Secondary indexes over devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceIndex {
    /// Value of the namespaced pool assignment annotation.
    NamespacedAssignment,
    /// Value of the cluster pool assignment annotation.
    ClusterAssignment,
    /// Name of the pool in `status.poolRef`.
    PoolRef,
}

impl DeviceIndex {
    pub fn for_scope(scope: AssignmentScope) -> Self {
        match scope {
            AssignmentScope::Namespaced => DeviceIndex::NamespacedAssignment,
            AssignmentScope::Cluster => DeviceIndex::ClusterAssignment,
        }
    }

    /// The indexed value of a device, if it has one.
    pub fn value_of(self, device: &GpuDevice) -> Option<&str> {
        match self {
            DeviceIndex::NamespacedAssignment => {
                device.assigned_pool(AssignmentScope::Namespaced)
            }
            DeviceIndex::ClusterAssignment => device.assigned_pool(AssignmentScope::Cluster),
            DeviceIndex::PoolRef => device.pool_ref().map(|r| r.name.as_str()),
        }
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Devices whose `index` value equals `value`.
    async fn list_devices(
        &self,
        index: DeviceIndex,
        value: &str,
    ) -> Result<Vec<GpuDevice>, Report<StoreError>>;

    /// Fails with [`StoreError::NotFound`] when the device does not exist.
    async fn get_device(&self, name: &str) -> Result<GpuDevice, Report<StoreError>>;

    /// Writes the status of `modified` as a diff against `original`.
    ///
    /// Fails with [`StoreError::Conflict`] when `original` is no longer the
    /// latest version of the object.
    async fn patch_device_status(
        &self,
        modified: &GpuDevice,
        original: &GpuDevice,
    ) -> Result<(), Report<StoreError>>;
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Returns `None` when the node does not exist.
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<StoreError>>;
}

#[async_trait]
pub trait PodStore: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<Pod>, Report<StoreError>>;
}
