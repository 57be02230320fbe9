use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::AssignmentScope;
use crate::IGNORE_LABEL;

/// A single GPU resource (whole card or MIG instance) on one node.
///
/// Everything the pool operator reads lives in the status, which is written by
/// the node-local discovery agent. The operator itself only ever writes
/// `status.poolRef` and `status.state`.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gpufleet.io",
    version = "v1alpha1",
    kind = "GPUDevice",
    root = "GpuDevice",
    plural = "gpudevices",
    shortname = "gpud",
    status = "GpuDeviceStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".status.poolRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GpuDeviceSpec {}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuDeviceStatus {
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default)]
    pub node_name: String,
    /// Stable identifier assigned by the inventory, used as the per-node sort key.
    #[serde(default, rename = "inventoryID")]
    pub inventory_id: String,
    #[serde(default)]
    pub hardware: HardwareInfo,
    /// The pool this device is currently bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_ref: Option<PoolReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    #[serde(default)]
    pub product: String,
    /// PCI vendor id as 4-digit lowercase hex, e.g. `10de`
    #[serde(default, rename = "pciVendorID")]
    pub pci_vendor_id: String,
    #[serde(default, rename = "pciDeviceID")]
    pub pci_device_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mig_types: Vec<MigType>,
}

/// Number of instances of one MIG profile exposed by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigType {
    /// Profile name, `<slices>g.<mem>gb`
    pub name: String,
    pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PoolReference {
    /// Builds a reference, omitting the namespace when it is empty.
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
        }
    }

    /// The namespace, with unset reported as the empty string.
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

/// Lifecycle of a [`GpuDevice`].
///
/// The pool operator only drives `Ready -> PendingAssignment` when binding and
/// `Assigned | Reserved | PendingAssignment -> Ready` when releasing. Every other
/// transition belongs to the discovery agent or the device plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum DeviceState {
    #[default]
    Discovered,
    Unassigned,
    Ready,
    PendingAssignment,
    Assigned,
    Reserved,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl GpuDevice {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn node_name(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.node_name.as_str())
            .unwrap_or_default()
    }

    pub fn inventory_id(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.inventory_id.as_str())
            .unwrap_or_default()
    }

    /// Per-node ordering key: the inventory id, or the object name when the
    /// inventory has not assigned one yet.
    pub fn sort_key(&self) -> &str {
        match self.inventory_id() {
            "" => self.name(),
            id => id,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn pool_ref(&self) -> Option<&PoolReference> {
        self.status.as_ref().and_then(|s| s.pool_ref.as_ref())
    }

    pub fn hardware(&self) -> Option<&HardwareInfo> {
        self.status.as_ref().map(|s| &s.hardware)
    }

    /// Name of the pool claiming this device through the scope's annotation.
    pub fn assigned_pool(&self, scope: AssignmentScope) -> Option<&str> {
        self.annotation(scope.annotation_key())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn is_ignored(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(IGNORE_LABEL))
            .is_some_and(|v| v == "true")
    }

    /// Total instances of the named MIG profile exposed by this device.
    pub fn mig_profile_count(&self, profile: &str) -> i32 {
        self.hardware()
            .map(|hw| {
                hw.mig_types
                    .iter()
                    .filter(|t| t.name == profile)
                    .map(|t| t.count)
                    .sum()
            })
            .unwrap_or_default()
    }
}
