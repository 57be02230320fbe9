//! kube-runtime reconcilers driving the selection and usage handlers.

use core::error::Error;
use std::sync::Arc;

use api_types::GpuDevice;
use api_types::GpuPoolStatus;
use api_types::PoolObject;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::config::RequeuePolicy;
use crate::domain::label_selector::LabelSelectorError;
use crate::domain::selection::SelectionError;
use crate::domain::selection::SelectionSyncHandler;
use crate::domain::usage::requested_resources;
use crate::domain::usage::UsageAccountant;
use crate::domain::usage::UsageError;
use crate::infrastructure::k8s::pool_kind::patch_pool_status;
use crate::infrastructure::k8s::KubeStore;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::PoolKind;

pub const NODE_SELECTOR_CONDITION: &str = "NodeSelectorValid";

/// Shared state of every reconciler.
pub struct Context {
    pub client: Client,
    pub selection: SelectionSyncHandler<KubeStore>,
    pub usage: UsageAccountant<KubeStore>,
    /// Bounds concurrent reconciles across all controllers.
    pub permits: Semaphore,
    pub requeue: RequeuePolicy,
    pub cancellation_token: CancellationToken,
}

/// Reconcile failure handed to kube-runtime, which needs a plain
/// `std::error::Error`.
#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("{_0:?}")]
    Selection(Report<SelectionError>),
    #[display("{_0:?}")]
    Usage(Report<UsageError>),
    #[display("{_0:?}")]
    Status(Report<KubernetesError>),
}

impl Error for ReconcileError {}

impl ReconcileError {
    pub fn is_configuration(&self) -> bool {
        match self {
            ReconcileError::Selection(report) => report.current_context().is_configuration(),
            ReconcileError::Usage(_) | ReconcileError::Status(_) => false,
        }
    }
}

#[instrument(skip_all, fields(pool = %pool.name_any(), namespace = pool.pool_namespace()))]
pub async fn reconcile_selection<P: PoolKind>(
    pool: Arc<P>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let Ok(_permit) = ctx.permits.acquire().await else {
        return Ok(Action::await_change());
    };

    let mut desired = (*pool).clone();
    let result = ctx
        .selection
        .handle_pool(&mut desired, &ctx.cancellation_token)
        .await;
    let generation = pool.meta().generation;

    let outcome = match result {
        Ok(summary) => {
            debug!(?summary, "selection finished");
            set_condition(
                &mut desired.pool_status_mut().conditions,
                node_selector_condition(true, "Valid", "", generation, Utc::now()),
            );
            Ok(Action::requeue(ctx.requeue.resync_interval))
        }
        Err(report) if report.current_context().is_configuration() => {
            let message = report
                .downcast_ref::<LabelSelectorError>()
                .map_or_else(|| report.to_string(), ToString::to_string);
            set_condition(
                &mut desired.pool_status_mut().conditions,
                node_selector_condition(false, "InvalidNodeSelector", &message, generation, Utc::now()),
            );
            Err(ReconcileError::Selection(report))
        }
        Err(report) => return Err(ReconcileError::Selection(report)),
    };

    let current = pool.pool_status().cloned().unwrap_or_default();
    let desired = desired.pool_status().cloned().unwrap_or_default();
    if let Some(patch) = selection_status_patch(&current, &desired) {
        patch_pool_status(ctx.client.clone(), pool.as_ref(), patch)
            .await
            .map_err(ReconcileError::Status)?;
    }
    outcome
}

#[instrument(skip_all, fields(pool = %pool.name_any(), namespace = pool.pool_namespace()))]
pub async fn reconcile_usage<P: PoolKind>(
    pool: Arc<P>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let Ok(_permit) = ctx.permits.acquire().await else {
        return Ok(Action::await_change());
    };

    let mut desired = (*pool).clone();
    ctx.usage
        .handle_pool(&mut desired, &ctx.cancellation_token)
        .await
        .map_err(ReconcileError::Usage)?;

    let current = pool.pool_status().cloned().unwrap_or_default();
    let desired = desired.pool_status().cloned().unwrap_or_default();
    if let Some(patch) = usage_status_patch(&current, &desired) {
        patch_pool_status(ctx.client.clone(), pool.as_ref(), patch)
            .await
            .map_err(ReconcileError::Status)?;
    }
    Ok(Action::requeue(ctx.requeue.resync_interval))
}

pub fn error_policy<P: PoolKind>(pool: Arc<P>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    let delay = if error.is_configuration() {
        ctx.requeue.config_error
    } else {
        ctx.requeue.error
    };
    warn!(
        pool = %pool.name_any(),
        namespace = pool.pool_namespace(),
        retry_in = ?delay,
        "reconcile failed: {error}"
    );
    Action::requeue(delay)
}

/// Run the selection controller for pools of kind `P` until cancelled.
///
/// Device changes wake the pool they are bound to.
pub async fn run_selection_controller<P: PoolKind>(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let token = ctx.cancellation_token.clone();
    let devices: Api<GpuDevice> = Api::all(client.clone());

    Controller::new(P::all(client), watcher::Config::default())
        .watches(devices, watcher::Config::default(), |device| {
            P::pools_for_device(&device)
        })
        .run(reconcile_selection::<P>, error_policy::<P>, ctx)
        .take_until(token.cancelled_owned())
        .for_each(|result| async move { log_result("selection", result) })
        .await;
}

/// Run the usage controller for pools of kind `P` until cancelled.
///
/// Pod changes wake every pool whose resource the pod requests.
pub async fn run_usage_controller<P: PoolKind>(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let token = ctx.cancellation_token.clone();
    let pods: Api<Pod> = Api::all(client.clone());

    let controller = Controller::new(P::all(client), watcher::Config::default());
    let pools = controller.store();
    controller
        .watches(pods, watcher::Config::default(), move |pod| {
            let requested = requested_resources(&pod);
            pools
                .state()
                .into_iter()
                .filter(|pool| requested.contains(&pool.resource_name()))
                .map(|pool| ObjectRef::from_obj(pool.as_ref()))
                .collect::<Vec<_>>()
        })
        .run(reconcile_usage::<P>, error_policy::<P>, ctx)
        .take_until(token.cancelled_owned())
        .for_each(|result| async move { log_result("usage", result) })
        .await;
}

fn log_result<K: Resource>(
    kind: &str,
    result: Result<(ObjectRef<K>, Action), controller::Error<ReconcileError, watcher::Error>>,
) {
    match result {
        Ok((pool, _)) => debug!(controller = kind, %pool, "reconciled"),
        // Already reported by the error policy.
        Err(controller::Error::ReconcilerFailed(_, pool)) => {
            debug!(controller = kind, %pool, "reconcile failed")
        }
        Err(e) => warn!(controller = kind, "controller error: {e}"),
    }
}

fn node_selector_condition(
    valid: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        type_: NODE_SELECTOR_CONDITION.to_string(),
        status: if valid { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation,
        last_transition_time: Time(now),
    }
}

/// Upsert `condition` by type. The transition time is kept while the status
/// stays the same, so an unchanged condition leaves `conditions` untouched.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return;
    };

    if existing.status == condition.status {
        condition.last_transition_time = existing.last_transition_time.clone();
    }
    *existing = condition;
}

/// Status fields owned by the selection controller that differ.
pub fn selection_status_patch(current: &GpuPoolStatus, desired: &GpuPoolStatus) -> Option<Value> {
    let mut patch = Map::new();
    if current.capacity.total != desired.capacity.total {
        patch.insert(
            "capacity".to_string(),
            json!({ "total": desired.capacity.total }),
        );
    }
    if current.conditions != desired.conditions {
        patch.insert("conditions".to_string(), json!(desired.conditions));
    }
    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Status fields owned by the usage controller that differ.
pub fn usage_status_patch(current: &GpuPoolStatus, desired: &GpuPoolStatus) -> Option<Value> {
    let (current, desired) = (current.capacity, desired.capacity);
    (current.used != desired.used || current.available != desired.available).then(|| {
        json!({
            "capacity": { "used": desired.used, "available": desired.available }
        })
    })
}

#[cfg(test)]
mod tests {
    use api_types::PoolCapacity;
    use chrono::TimeZone;
    use similar_asserts::assert_eq;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn status(total: i32, used: i32, available: i32) -> GpuPoolStatus {
        GpuPoolStatus {
            capacity: PoolCapacity {
                total,
                used,
                available,
            },
            conditions: Vec::new(),
        }
    }

    #[test]
    fn condition_is_added_then_kept_stable() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            node_selector_condition(true, "Valid", "", Some(1), at(100)),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Time(at(100)));

        let before = conditions.clone();
        set_condition(
            &mut conditions,
            node_selector_condition(true, "Valid", "", Some(1), at(200)),
        );
        assert_eq!(conditions, before);
    }

    #[test]
    fn condition_transition_time_moves_on_status_flip() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            node_selector_condition(true, "Valid", "", Some(1), at(100)),
        );
        set_condition(
            &mut conditions,
            node_selector_condition(false, "InvalidNodeSelector", "bad operator", Some(2), at(200)),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].message, "bad operator");
        assert_eq!(conditions[0].last_transition_time, Time(at(200)));
    }

    #[test]
    fn selection_patch_only_carries_changed_fields() {
        assert_eq!(selection_status_patch(&status(4, 1, 3), &status(4, 1, 3)), None);
        assert_eq!(
            selection_status_patch(&status(4, 1, 3), &status(6, 1, 3)),
            Some(json!({ "capacity": { "total": 6 } }))
        );
    }

    #[test]
    fn selection_patch_ignores_usage_fields() {
        assert_eq!(selection_status_patch(&status(4, 1, 3), &status(4, 2, 2)), None);
    }

    #[test]
    fn usage_patch_only_carries_used_and_available() {
        assert_eq!(usage_status_patch(&status(4, 1, 3), &status(4, 1, 3)), None);
        assert_eq!(
            usage_status_patch(&status(4, 1, 3), &status(9, 2, 2)),
            Some(json!({ "capacity": { "used": 2, "available": 2 } }))
        );
    }
}
