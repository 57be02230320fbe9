//! Pool usage accounting from pod resource requests.

use core::error::Error;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::PoolObject;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::store::PodStore;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum UsageError {
    #[display("failed to list pods for pool {pool}")]
    ListPods { pool: String },
    #[display("usage accounting cancelled")]
    Cancelled,
}

impl Error for UsageError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolUsage {
    pub used: i32,
    pub available: i32,
}

impl PoolUsage {
    /// `available` never goes below zero, even when `used` exceeds `total`.
    pub fn from_totals(total: i32, used: i64) -> Self {
        let used = i32::try_from(used).unwrap_or(i32::MAX);
        Self {
            used,
            available: total.saturating_sub(used).max(0),
        }
    }
}

pub struct UsageAccountant<S> {
    store: Arc<S>,
}

impl<S: PodStore> UsageAccountant<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute `status.capacity.{used,available}` of `pool` from the pods
    /// consuming its resource. Only the in-memory pool is updated.
    pub async fn handle_pool<P: PoolObject>(
        &self,
        pool: &mut P,
        cancellation_token: &CancellationToken,
    ) -> Result<PoolUsage, Report<UsageError>> {
        let pool_name = pool.pool_name().to_string();
        let resource_name = pool.resource_name();
        let total = pool.pool_status().map_or(0, |s| s.capacity.total);

        if cancellation_token.is_cancelled() {
            return Err(Report::new(UsageError::Cancelled));
        }
        let pods = self
            .store
            .list_pods()
            .await
            .change_context_lazy(|| UsageError::ListPods {
                pool: pool_name.clone(),
            })?;

        let used: i64 = pods
            .iter()
            .filter(|pod| is_active(pod))
            .map(|pod| pod_usage(pod, &resource_name))
            .sum();
        let usage = PoolUsage::from_totals(total, used);

        if i64::from(usage.used) > i64::from(total) {
            warn!(
                pool = %pool_name,
                resource = %resource_name,
                total,
                used = usage.used,
                "pool is overcommitted"
            );
        }

        let capacity = &mut pool.pool_status_mut().capacity;
        capacity.used = usage.used;
        capacity.available = usage.available;

        info!(
            pool = %pool_name,
            resource = %resource_name,
            total,
            used = usage.used,
            available = usage.available,
            "pool usage synced"
        );
        Ok(usage)
    }
}

/// Scheduled and not yet terminated.
pub fn is_active(pod: &Pod) -> bool {
    let scheduled = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .is_some_and(|node| !node.is_empty());
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    scheduled && !matches!(phase, Some("Succeeded" | "Failed"))
}

/// Effective amount of `resource` held by `pod`: the larger of the sum over
/// its containers and the largest single init container.
pub fn pod_usage(pod: &Pod, resource: &str) -> i64 {
    let Some(spec) = pod.spec.as_ref() else {
        return 0;
    };
    let containers: i64 = spec
        .containers
        .iter()
        .map(|c| container_usage(c, resource))
        .sum();
    let init = spec
        .init_containers
        .iter()
        .flatten()
        .map(|c| container_usage(c, resource))
        .max()
        .unwrap_or(0);
    containers.max(init)
}

/// Every resource name any container of `pod` requests or limits.
pub fn requested_resources(pod: &Pod) -> BTreeSet<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return BTreeSet::new();
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(|c| c.resources.as_ref())
        .flat_map(|r| r.requests.iter().chain(r.limits.iter()))
        .flat_map(|quantities| quantities.keys().cloned())
        .collect()
}

/// The container's request for `resource`, falling back to its limit.
fn container_usage(container: &Container, resource: &str) -> i64 {
    let Some(resources) = container.resources.as_ref() else {
        return 0;
    };
    let request = resources.requests.as_ref().and_then(|m| m.get(resource));
    let limit = resources.limits.as_ref().and_then(|m| m.get(resource));
    request
        .or(limit)
        .map_or(0, |quantity| parse_count(&container.name, resource, quantity))
}

fn parse_count(container: &str, resource: &str, quantity: &Quantity) -> i64 {
    match quantity.0.trim().parse::<i64>() {
        Ok(count) if count >= 0 => count,
        _ => {
            warn!(
                container,
                resource,
                quantity = %quantity.0,
                "ignoring non-integer resource quantity"
            );
            0
        }
    }
}
