use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::AssignmentScope;
use crate::API_GROUP;

/// Selection policy and resource model shared by both pool kinds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_selector: Option<DeviceSelector>,
    /// Restricts eligible devices to nodes matching this selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,
    #[serde(default)]
    pub resource: PoolResource,
}

/// Namespaced pool of GPU devices.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gpufleet.io",
    version = "v1alpha1",
    kind = "GPUPool",
    root = "GpuPool",
    plural = "gpupools",
    shortname = "gpupool",
    namespaced,
    status = "GpuPoolStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Total","type":"integer","jsonPath":".status.capacity.total"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.capacity.available"}"#
)]
pub struct GpuPoolSpec {
    #[serde(flatten)]
    pub pool: PoolSpec,
}

/// Cluster-scoped pool of GPU devices.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gpufleet.io",
    version = "v1alpha1",
    kind = "ClusterGPUPool",
    root = "ClusterGpuPool",
    plural = "clustergpupools",
    shortname = "cgpupool",
    status = "GpuPoolStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Total","type":"integer","jsonPath":".status.capacity.total"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.capacity.available"}"#
)]
pub struct ClusterGpuPoolSpec {
    #[serde(flatten)]
    pub pool: PoolSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<DeviceRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<DeviceRules>,
}

/// Five independent rule categories. An empty category places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRules {
    #[serde(default, rename = "inventoryIDs", skip_serializing_if = "BTreeSet::is_empty")]
    pub inventory_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub products: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pci_vendors: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pci_devices: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mig_profiles: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ResourceUnit {
    #[default]
    Card,
    #[serde(rename = "MIG")]
    Mig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolResource {
    #[serde(default)]
    pub unit: ResourceUnit,
    /// MIG profile counted when `unit` is `MIG`, e.g. `1g.10gb`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mig_profile: Option<String>,
    /// Units contributed per card or per MIG instance; zero means one.
    #[serde(default)]
    pub slices_per_unit: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_devices_per_node: Option<i32>,
    /// Extended resource requested by pods consuming this pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuPoolStatus {
    #[serde(default)]
    pub capacity: PoolCapacity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolCapacity {
    #[serde(default)]
    pub total: i32,
    #[serde(default)]
    pub used: i32,
    #[serde(default)]
    pub available: i32,
}

/// Uniform access to [`GpuPool`] and [`ClusterGpuPool`].
pub trait PoolObject {
    fn pool_name(&self) -> &str;

    /// Namespace of the pool; empty for cluster-scoped pools.
    fn pool_namespace(&self) -> &str;

    fn pool_spec(&self) -> &PoolSpec;

    fn pool_status(&self) -> Option<&GpuPoolStatus>;

    fn pool_status_mut(&mut self) -> &mut GpuPoolStatus;

    fn assignment_scope(&self) -> AssignmentScope;

    /// Extended resource name pods use to request units of this pool.
    fn resource_name(&self) -> String {
        self.pool_spec()
            .resource
            .resource_name
            .clone()
            .unwrap_or_else(|| format!("{API_GROUP}/{}", self.pool_name()))
    }
}

impl PoolObject for GpuPool {
    fn pool_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pool_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn pool_spec(&self) -> &PoolSpec {
        &self.spec.pool
    }

    fn pool_status(&self) -> Option<&GpuPoolStatus> {
        self.status.as_ref()
    }

    fn pool_status_mut(&mut self) -> &mut GpuPoolStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn assignment_scope(&self) -> AssignmentScope {
        AssignmentScope::Namespaced
    }
}

impl PoolObject for ClusterGpuPool {
    fn pool_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn pool_namespace(&self) -> &str {
        ""
    }

    fn pool_spec(&self) -> &PoolSpec {
        &self.spec.pool
    }

    fn pool_status(&self) -> Option<&GpuPoolStatus> {
        self.status.as_ref()
    }

    fn pool_status_mut(&mut self) -> &mut GpuPoolStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn assignment_scope(&self) -> AssignmentScope {
        AssignmentScope::Cluster
    }
}
