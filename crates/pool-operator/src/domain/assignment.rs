//! Binding and releasing devices.
//!
//! Both primitives run through [`update_device_status`]: fetch the latest
//! device, mutate a copy, patch the status diff, and retry the whole cycle on
//! a write conflict. A device that disappears at any point counts as done.

use api_types::DeviceState;
use api_types::GpuDevice;
use api_types::PoolReference;
use error_stack::Report;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::device_state::transition;
use super::device_state::AssignmentEvent;
use super::retry::retry_on_conflict;
use super::retry::RetryPolicy;
use super::store::DeviceStore;
use super::store::StoreError;
use super::store::StoreErrorExt;

/// Whether `device` is bound to the pool `pool_name` in `pool_namespace`.
/// Empty namespaces mean cluster scope and only match each other.
pub fn is_bound_to(device: &GpuDevice, pool_name: &str, pool_namespace: &str) -> bool {
    device
        .pool_ref()
        .is_some_and(|r| r.name == pool_name && r.namespace() == pool_namespace)
}

/// Whether a selected device must be (re)written to reflect its binding.
///
/// `Ready` devices always need a write, because binding is what moves them on
/// to `PendingAssignment`.
pub fn needs_assignment_update(device: &GpuDevice, pool_name: &str, pool_namespace: &str) -> bool {
    !is_bound_to(device, pool_name, pool_namespace) || device.state() == DeviceState::Ready
}

/// Bind `device` to the pool. Always reports a change; the caller drops no-op
/// patches by comparing statuses.
pub fn bind(device: &mut GpuDevice, pool_name: &str, pool_namespace: &str) -> bool {
    let status = device.status.get_or_insert_with(Default::default);
    status.pool_ref = Some(PoolReference::new(pool_name, pool_namespace));
    status.state = transition(status.state, AssignmentEvent::Bind);
    true
}

/// Clear the binding of `device` to the pool, unless it has been re-claimed
/// through `annotation_key` or is bound elsewhere.
pub fn release(
    device: &mut GpuDevice,
    pool_name: &str,
    pool_namespace: &str,
    annotation_key: &str,
) -> bool {
    if device.annotation(annotation_key) == Some(pool_name) {
        return false;
    }
    let Some(status) = device.status.as_mut() else {
        return false;
    };
    let Some(pool_ref) = status.pool_ref.as_ref() else {
        return false;
    };
    if pool_ref.name != pool_name {
        return false;
    }
    // A ref without namespace is released by either pool scope.
    if !pool_ref.namespace().is_empty() && pool_ref.namespace() != pool_namespace {
        return false;
    }

    status.pool_ref = None;
    status.state = transition(status.state, AssignmentEvent::Release);
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Patched,
    Unchanged,
    NotFound,
}

/// Fetch `name`, apply `mutate` to a copy and patch the status diff.
///
/// `mutate` returns whether it changed anything; unchanged devices are not
/// written. Conflicts restart from the fetch according to `policy`.
pub async fn update_device_status<S, M>(
    store: &S,
    policy: &RetryPolicy,
    cancellation_token: &CancellationToken,
    name: &str,
    mutate: M,
) -> Result<UpdateOutcome, Report<StoreError>>
where
    S: DeviceStore + ?Sized,
    M: Fn(&mut GpuDevice) -> bool,
{
    let mutate = &mutate;
    retry_on_conflict(policy, cancellation_token, move || async move {
        if cancellation_token.is_cancelled() {
            return Err(Report::new(StoreError::Cancelled));
        }

        let original = match store.get_device(name).await {
            Ok(device) => device,
            Err(e) if e.is_not_found() => return Ok(UpdateOutcome::NotFound),
            Err(e) => return Err(e),
        };

        let mut modified = original.clone();
        if !mutate(&mut modified) || modified.status == original.status {
            return Ok(UpdateOutcome::Unchanged);
        }

        match store.patch_device_status(&modified, &original).await {
            Ok(()) => Ok(UpdateOutcome::Patched),
            Err(e) if e.is_not_found() => Ok(UpdateOutcome::NotFound),
            Err(e) => Err(e),
        }
    })
    .await
}

/// Bind device `name` to the pool, moving `Ready` devices to
/// `PendingAssignment`.
pub async fn assign_device_with_retry<S>(
    store: &S,
    policy: &RetryPolicy,
    cancellation_token: &CancellationToken,
    name: &str,
    pool_name: &str,
    pool_namespace: &str,
) -> Result<UpdateOutcome, Report<StoreError>>
where
    S: DeviceStore + ?Sized,
{
    let outcome = update_device_status(store, policy, cancellation_token, name, |device| {
        bind(device, pool_name, pool_namespace)
    })
    .await?;
    debug!(device = name, pool = pool_name, ?outcome, "assign device");
    Ok(outcome)
}

/// Release device `name` from the pool, returning held devices to `Ready`.
pub async fn clear_device_pool<S>(
    store: &S,
    policy: &RetryPolicy,
    cancellation_token: &CancellationToken,
    name: &str,
    pool_name: &str,
    pool_namespace: &str,
    annotation_key: &str,
) -> Result<UpdateOutcome, Report<StoreError>>
where
    S: DeviceStore + ?Sized,
{
    let outcome = update_device_status(store, policy, cancellation_token, name, |device| {
        release(device, pool_name, pool_namespace, annotation_key)
    })
    .await?;
    debug!(device = name, pool = pool_name, ?outcome, "clear device pool");
    Ok(outcome)
}
