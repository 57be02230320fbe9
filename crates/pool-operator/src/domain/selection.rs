//! Pool device selection.
//!
//! [`SelectionSyncHandler::handle_pool`] converges the devices claimed by a
//! pool's assignment annotation into `status.poolRef` bindings, releases
//! bindings whose claim was withdrawn, and computes the pool's total capacity.

use core::error::Error;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::GpuDevice;
use api_types::PoolObject;
use error_stack::Report;
use error_stack::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::assignment::assign_device_with_retry;
use super::assignment::clear_device_pool;
use super::assignment::is_bound_to;
use super::assignment::needs_assignment_update;
use super::capacity::node_has_room;
use super::capacity::units_for_device;
use super::device_selector;
use super::label_selector::NodeSelector;
use super::retry::RetryPolicy;
use super::store::DeviceIndex;
use super::store::DeviceStore;
use super::store::NodeStore;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SelectionError {
    #[display("pool {pool} has an invalid node selector")]
    InvalidNodeSelector { pool: String },
    #[display("failed to list devices by {index:?} for pool {pool}")]
    ListDevices { pool: String, index: DeviceIndex },
    #[display("failed to get node {node}")]
    GetNode { node: String },
    #[display("failed to assign device {device} to pool {pool}")]
    AssignDevice { device: String, pool: String },
    #[display("failed to release device {device} from pool {pool}")]
    ClearDevice { device: String, pool: String },
    #[display("selection cancelled")]
    Cancelled,
}

impl Error for SelectionError {}

impl SelectionError {
    /// Configuration errors reproduce until the pool spec changes.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SelectionError::InvalidNodeSelector { .. })
    }
}

/// What a successful selection pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSummary {
    /// Claimed devices that passed every filter.
    pub matched: usize,
    pub capacity: i32,
    pub assigned: usize,
    pub released: usize,
}

pub struct SelectionSyncHandler<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S> SelectionSyncHandler<S>
where
    S: DeviceStore + NodeStore,
{
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Reconcile device bindings and `status.capacity.total` for `pool`.
    ///
    /// The capacity is written to the in-memory pool only; persisting the pool
    /// status is left to the caller. Device writes already applied when an
    /// error occurs are not rolled back, the next pass converges them.
    pub async fn handle_pool<P: PoolObject>(
        &self,
        pool: &mut P,
        cancellation_token: &CancellationToken,
    ) -> Result<SelectionSummary, Report<SelectionError>> {
        let pool_name = pool.pool_name().to_string();
        let pool_namespace = pool.pool_namespace().to_string();
        let scope = pool.assignment_scope();
        let annotation_key = scope.annotation_key();
        let spec = pool.pool_spec().clone();

        let claim_index = DeviceIndex::for_scope(scope);
        ensure_running(cancellation_token)?;
        let claimed = self
            .store
            .list_devices(claim_index, &pool_name)
            .await
            .change_context_lazy(|| SelectionError::ListDevices {
                pool: pool_name.clone(),
                index: claim_index,
            })?;
        ensure_running(cancellation_token)?;
        let bound = self
            .store
            .list_devices(DeviceIndex::PoolRef, &pool_name)
            .await
            .change_context_lazy(|| SelectionError::ListDevices {
                pool: pool_name.clone(),
                index: DeviceIndex::PoolRef,
            })?;

        let eligible_nodes = match &spec.node_selector {
            Some(selector) => {
                let selector = NodeSelector::parse(selector).change_context_lazy(|| {
                    SelectionError::InvalidNodeSelector {
                        pool: pool_name.clone(),
                    }
                })?;
                Some(
                    self.eligible_nodes(&selector, &claimed, cancellation_token)
                        .await?,
                )
            }
            None => None,
        };

        let mut by_node: BTreeMap<&str, Vec<&GpuDevice>> = BTreeMap::new();
        for device in &claimed {
            let node = device.node_name();
            if device.is_ignored() || node.is_empty() {
                continue;
            }
            if eligible_nodes
                .as_ref()
                .is_some_and(|nodes| !nodes.contains(node))
            {
                continue;
            }
            if !device_selector::matches(device, spec.device_selector.as_ref()) {
                continue;
            }
            by_node.entry(node).or_default().push(device);
        }

        let mut summary = SelectionSummary::default();
        let mut pending = Vec::new();
        for devices in by_node.values_mut() {
            // Stable order makes the per-node cap pick the same devices every time.
            devices.sort_by(|a, b| {
                a.sort_key()
                    .cmp(b.sort_key())
                    .then_with(|| a.name().cmp(b.name()))
            });

            let mut taken_on_node = 0;
            for device in devices.iter() {
                summary.matched += 1;
                if needs_assignment_update(device, &pool_name, &pool_namespace) {
                    pending.push(device.name().to_string());
                }
                if !node_has_room(taken_on_node, spec.resource.max_devices_per_node) {
                    continue;
                }
                let units = units_for_device(device, &spec.resource);
                if units > 0 {
                    summary.capacity = summary.capacity.saturating_add(units);
                    taken_on_node += 1;
                }
            }
        }

        for device in &bound {
            if device.annotation(annotation_key) == Some(pool_name.as_str())
                || !is_bound_to(device, &pool_name, &pool_namespace)
            {
                continue;
            }
            ensure_running(cancellation_token)?;
            clear_device_pool(
                self.store.as_ref(),
                &self.retry,
                cancellation_token,
                device.name(),
                &pool_name,
                &pool_namespace,
                annotation_key,
            )
            .await
            .change_context_lazy(|| SelectionError::ClearDevice {
                device: device.name().to_string(),
                pool: pool_name.clone(),
            })?;
            summary.released += 1;
        }

        pool.pool_status_mut().capacity.total = summary.capacity;

        for device in &pending {
            ensure_running(cancellation_token)?;
            assign_device_with_retry(
                self.store.as_ref(),
                &self.retry,
                cancellation_token,
                device,
                &pool_name,
                &pool_namespace,
            )
            .await
            .change_context_lazy(|| SelectionError::AssignDevice {
                device: device.clone(),
                pool: pool_name.clone(),
            })?;
            summary.assigned += 1;
        }

        info!(
            pool = %pool_name,
            namespace = %pool_namespace,
            matched = summary.matched,
            capacity = summary.capacity,
            assigned = summary.assigned,
            released = summary.released,
            "pool selection synced"
        );
        Ok(summary)
    }

    /// Nodes hosting claimed devices whose labels satisfy `selector`. Nodes
    /// that no longer exist are not eligible.
    async fn eligible_nodes(
        &self,
        selector: &NodeSelector,
        claimed: &[GpuDevice],
        cancellation_token: &CancellationToken,
    ) -> Result<BTreeSet<String>, Report<SelectionError>> {
        let candidates: BTreeSet<&str> = claimed
            .iter()
            .map(GpuDevice::node_name)
            .filter(|node| !node.is_empty())
            .collect();

        let mut eligible = BTreeSet::new();
        for name in candidates {
            ensure_running(cancellation_token)?;
            let node = self
                .store
                .get_node(name)
                .await
                .change_context_lazy(|| SelectionError::GetNode {
                    node: name.to_string(),
                })?;
            let Some(node) = node else {
                debug!(node = name, "node not found, excluding its devices");
                continue;
            };
            let labels = node.metadata.labels.unwrap_or_default();
            if selector.matches(&labels) {
                eligible.insert(name.to_string());
            } else {
                debug!(node = name, "node does not match pool node selector");
            }
        }
        Ok(eligible)
    }
}

fn ensure_running(cancellation_token: &CancellationToken) -> Result<(), Report<SelectionError>> {
    if cancellation_token.is_cancelled() {
        return Err(Report::new(SelectionError::Cancelled));
    }
    Ok(())
}
