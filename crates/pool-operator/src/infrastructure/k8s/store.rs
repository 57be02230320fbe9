use api_types::GpuDevice;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use crate::domain::store::DeviceIndex;
use crate::domain::store::DeviceStore;
use crate::domain::store::NodeStore;
use crate::domain::store::PodStore;
use crate::domain::store::StoreError;

/// Pods that can still hold resources. Terminal pods are filtered again
/// locally, this only trims the response.
const NON_TERMINAL_PODS: &str = "status.phase!=Succeeded,status.phase!=Failed";

/// Store capabilities served by the API server.
///
/// Device lookups by index list every device and filter locally; the API
/// server cannot select on annotations or status fields of custom resources.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn devices(&self) -> Api<GpuDevice> {
        Api::all(self.client.clone())
    }
}

fn store_error(name: &str, err: kube::Error) -> Report<StoreError> {
    let context = match &err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            name: name.to_string(),
        },
        _ => StoreError::Api {
            message: format!("request for {name} failed"),
        },
    };
    Report::new(err).change_context(context)
}

#[async_trait]
impl DeviceStore for KubeStore {
    async fn list_devices(
        &self,
        index: DeviceIndex,
        value: &str,
    ) -> Result<Vec<GpuDevice>, Report<StoreError>> {
        let devices = self
            .devices()
            .list(&ListParams::default())
            .await
            .map_err(|e| store_error("gpudevices", e))?;
        Ok(devices
            .items
            .into_iter()
            .filter(|device| index.value_of(device) == Some(value))
            .collect())
    }

    async fn get_device(&self, name: &str) -> Result<GpuDevice, Report<StoreError>> {
        self.devices()
            .get(name)
            .await
            .map_err(|e| store_error(name, e))
    }

    async fn patch_device_status(
        &self,
        modified: &GpuDevice,
        original: &GpuDevice,
    ) -> Result<(), Report<StoreError>> {
        let name = original.name();
        let serialization_failed = || StoreError::Api {
            message: format!("failed to serialize status of {name}"),
        };
        let before = serde_json::to_value(&original.status).change_context_lazy(serialization_failed)?;
        let after = serde_json::to_value(&modified.status).change_context_lazy(serialization_failed)?;

        let Some(status) = merge_patch(&before, &after) else {
            debug!(device = name, "status unchanged, skipping patch");
            return Ok(());
        };

        // The resourceVersion turns the merge patch into a compare-and-swap.
        let patch = json!({
            "metadata": { "resourceVersion": original.metadata.resource_version },
            "status": status,
        });
        self.devices()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| store_error(name, e))?;
        Ok(())
    }
}

#[async_trait]
impl NodeStore for KubeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<StoreError>> {
        Api::<Node>::all(self.client.clone())
            .get_opt(name)
            .await
            .map_err(|e| store_error(name, e))
    }
}

#[async_trait]
impl PodStore for KubeStore {
    async fn list_pods(&self) -> Result<Vec<Pod>, Report<StoreError>> {
        let pods = Api::<Pod>::all(self.client.clone())
            .list(&ListParams::default().fields(NON_TERMINAL_PODS))
            .await
            .map_err(|e| store_error("pods", e))?;
        Ok(pods.items)
    }
}

/// JSON merge patch (RFC 7386) turning `original` into `modified`, or `None`
/// when they are equal. Removed keys are patched to `null`.
pub fn merge_patch(original: &Value, modified: &Value) -> Option<Value> {
    if original == modified {
        return None;
    }
    let (Value::Object(before), Value::Object(after)) = (original, modified) else {
        return Some(modified.clone());
    };

    let mut patch = Map::new();
    for (key, value) in after {
        match before.get(key) {
            Some(old) => {
                if let Some(diff) = merge_patch(old, value) {
                    patch.insert(key.clone(), diff);
                }
            }
            None => {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    Some(Value::Object(patch))
}

#[cfg(test)]
mod tests {
    use api_types::DeviceState;
    use api_types::GpuDeviceStatus;
    use api_types::PoolReference;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn equal_documents_need_no_patch() {
        let doc = json!({ "state": "Ready", "nodeName": "node-a" });
        assert_eq!(merge_patch(&doc, &doc.clone()), None);
    }

    #[test]
    fn patch_contains_only_changed_and_removed_fields() {
        let before = json!({
            "state": "Assigned",
            "nodeName": "node-a",
            "poolRef": { "name": "p", "namespace": "team-a" },
            "hardware": { "product": "A100" },
        });
        let after = json!({
            "state": "Ready",
            "nodeName": "node-a",
            "hardware": { "product": "A100" },
        });

        assert_eq!(
            merge_patch(&before, &after),
            Some(json!({ "state": "Ready", "poolRef": null }))
        );
    }

    #[test]
    fn nested_objects_are_diffed() {
        let before = json!({ "poolRef": { "name": "p", "namespace": "team-a" } });
        let after = json!({ "poolRef": { "name": "p" } });

        assert_eq!(
            merge_patch(&before, &after),
            Some(json!({ "poolRef": { "namespace": null } }))
        );
    }

    #[test]
    fn binding_a_device_patches_state_and_pool_ref() {
        let original = GpuDeviceStatus {
            state: DeviceState::Ready,
            node_name: "node-a".to_string(),
            ..Default::default()
        };
        let modified = GpuDeviceStatus {
            state: DeviceState::PendingAssignment,
            pool_ref: Some(PoolReference::new("p", "")),
            ..original.clone()
        };

        let patch = merge_patch(
            &serde_json::to_value(&original).expect("serialize"),
            &serde_json::to_value(&modified).expect("serialize"),
        );

        assert_eq!(
            patch,
            Some(json!({ "state": "PendingAssignment", "poolRef": { "name": "p" } }))
        );
    }

    #[test]
    fn missing_status_patches_whole_object() {
        let after = json!({ "state": "Ready" });
        assert_eq!(merge_patch(&Value::Null, &after), Some(after));
    }
}
