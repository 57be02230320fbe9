//! In-memory store used by tests
//!
//! Mimics the optimistic concurrency of the API server: every object carries a
//! resourceVersion, status patches are rejected with a conflict when the
//! caller's snapshot is stale, and each accepted patch bumps the version.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Mutex;

use api_types::GpuDevice;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;

use super::store::DeviceIndex;
use super::store::DeviceStore;
use super::store::NodeStore;
use super::store::PodStore;
use super::store::StoreError;

#[derive(Default)]
pub struct InMemoryStore {
    devices: Mutex<BTreeMap<String, GpuDevice>>,
    nodes: Mutex<BTreeMap<String, Node>>,
    pods: Mutex<Vec<Pod>>,
    patches: Mutex<Vec<String>>,
    injected_conflicts: Mutex<HashMap<String, usize>>,
    vanishing: Mutex<BTreeSet<String>>,
    fail_lists: Mutex<bool>,
    fail_node_gets: Mutex<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device, assigning it a fresh resourceVersion.
    pub fn put_device(&self, mut device: GpuDevice) {
        let name = device.name().to_string();
        let mut devices = self.devices.lock().unwrap();
        let next = devices
            .get(&name)
            .map(|d| resource_version(d) + 1)
            .unwrap_or(1);
        device.metadata.resource_version = Some(next.to_string());
        devices.insert(name, device);
    }

    pub fn remove_device(&self, name: &str) {
        self.devices.lock().unwrap().remove(name);
    }

    pub fn device(&self, name: &str) -> Option<GpuDevice> {
        self.devices.lock().unwrap().get(name).cloned()
    }

    pub fn put_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    pub fn put_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    /// Names of devices whose status was patched, in patch order.
    pub fn patched_devices(&self) -> Vec<String> {
        self.patches.lock().unwrap().clone()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn reset_patches(&self) {
        self.patches.lock().unwrap().clear();
    }

    /// The next `times` status patches to `name` fail with a conflict, as if
    /// another writer had won each race.
    pub fn inject_conflicts(&self, name: &str, times: usize) {
        self.injected_conflicts
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
    }

    /// `name` is deleted right before its next status patch lands, as if it
    /// vanished between the read and the write.
    pub fn vanish_before_patch(&self, name: &str) {
        self.vanishing.lock().unwrap().insert(name.to_string());
    }

    pub fn set_fail_lists(&self, enabled: bool) {
        *self.fail_lists.lock().unwrap() = enabled;
    }

    pub fn set_fail_node_gets(&self, enabled: bool) {
        *self.fail_node_gets.lock().unwrap() = enabled;
    }

    fn take_injected_conflict(&self, name: &str) -> bool {
        let mut conflicts = self.injected_conflicts.lock().unwrap();
        match conflicts.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn resource_version(device: &GpuDevice) -> u64 {
    device
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn list_devices(
        &self,
        index: DeviceIndex,
        value: &str,
    ) -> Result<Vec<GpuDevice>, Report<StoreError>> {
        if *self.fail_lists.lock().unwrap() {
            return Err(Report::new(StoreError::Api {
                message: "injected list failure".to_string(),
            }));
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .values()
            .filter(|d| index.value_of(d) == Some(value))
            .cloned()
            .collect())
    }

    async fn get_device(&self, name: &str) -> Result<GpuDevice, Report<StoreError>> {
        self.device(name).ok_or_else(|| {
            Report::new(StoreError::NotFound {
                name: name.to_string(),
            })
        })
    }

    async fn patch_device_status(
        &self,
        modified: &GpuDevice,
        original: &GpuDevice,
    ) -> Result<(), Report<StoreError>> {
        let name = original.name().to_string();
        if self.vanishing.lock().unwrap().remove(&name) {
            self.remove_device(&name);
        }
        if self.take_injected_conflict(&name) {
            // The competing writer bumps the version, so the caller must refetch.
            let current = self.device(&name);
            if let Some(current) = current {
                self.put_device(current);
            }
            return Err(Report::new(StoreError::Conflict { name }));
        }

        let mut devices = self.devices.lock().unwrap();
        let Some(current) = devices.get_mut(&name) else {
            return Err(Report::new(StoreError::NotFound { name }));
        };
        if resource_version(current) != resource_version(original) {
            return Err(Report::new(StoreError::Conflict { name }));
        }

        current.status = modified.status.clone();
        current.metadata.resource_version = Some((resource_version(original) + 1).to_string());
        self.patches.lock().unwrap().push(name);
        Ok(())
    }
}

#[async_trait]
impl NodeStore for InMemoryStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<StoreError>> {
        if *self.fail_node_gets.lock().unwrap() {
            return Err(Report::new(StoreError::Api {
                message: "injected node get failure".to_string(),
            }));
        }
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }
}

#[async_trait]
impl PodStore for InMemoryStore {
    async fn list_pods(&self) -> Result<Vec<Pod>, Report<StoreError>> {
        if *self.fail_lists.lock().unwrap() {
            return Err(Report::new(StoreError::Api {
                message: "injected list failure".to_string(),
            }));
        }
        Ok(self.pods.lock().unwrap().clone())
    }
}
