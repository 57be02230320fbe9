use std::fmt::Debug;

use api_types::AssignmentScope;
use api_types::ClusterGpuPool;
use api_types::GpuDevice;
use api_types::GpuPool;
use api_types::PoolObject;
use error_stack::Report;
use error_stack::ResultExt;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::runtime::reflector::ObjectRef;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::json;
use serde_json::Value;

use super::KubernetesError;

/// API access shared by [`GpuPool`] and [`ClusterGpuPool`].
pub trait PoolKind:
    PoolObject
    + Resource<DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Api covering every pool of this kind.
    fn all(client: Client) -> Api<Self>;

    /// Api able to address this particular pool.
    fn api(&self, client: Client) -> Api<Self>;

    /// Pools of this kind a device event should wake up.
    ///
    /// Namespaced annotations carry no namespace, so a freshly claimed device
    /// of a namespaced pool is only picked up on the next resync.
    fn pools_for_device(device: &GpuDevice) -> Vec<ObjectRef<Self>>;
}

impl PoolKind for GpuPool {
    fn all(client: Client) -> Api<Self> {
        Api::all(client)
    }

    fn api(&self, client: Client) -> Api<Self> {
        Api::namespaced(client, self.pool_namespace())
    }

    fn pools_for_device(device: &GpuDevice) -> Vec<ObjectRef<Self>> {
        device
            .pool_ref()
            .filter(|r| !r.namespace().is_empty())
            .map(|r| ObjectRef::new(&r.name).within(r.namespace()))
            .into_iter()
            .collect()
    }
}

impl PoolKind for ClusterGpuPool {
    fn all(client: Client) -> Api<Self> {
        Api::all(client)
    }

    fn api(&self, client: Client) -> Api<Self> {
        Api::all(client)
    }

    fn pools_for_device(device: &GpuDevice) -> Vec<ObjectRef<Self>> {
        let bound = device
            .pool_ref()
            .filter(|r| r.namespace().is_empty())
            .map(|r| r.name.as_str());
        let claimed = device.assigned_pool(AssignmentScope::Cluster);

        let mut refs: Vec<ObjectRef<Self>> = bound.into_iter().map(ObjectRef::new).collect();
        if let Some(claimed) = claimed.filter(|c| Some(*c) != bound) {
            refs.push(ObjectRef::new(claimed));
        }
        refs
    }
}

/// Merge `status` into the status subresource of `pool`.
pub async fn patch_pool_status<P: PoolKind>(
    client: Client,
    pool: &P,
    status: Value,
) -> Result<(), Report<KubernetesError>> {
    let name = pool.pool_name();
    pool.api(client)
        .patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await
        .change_context_lazy(|| KubernetesError::StatusPatchFailed {
            kind: P::kind(&()).to_string(),
            name: name.to_string(),
        })?;
    Ok(())
}
