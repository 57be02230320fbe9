use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::retry::RetryPolicy;

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "POOL_OPERATOR_WORKERS",
        default_value_t = 1,
        help = "Maximum number of pools reconciled concurrently, values below 1 mean 1"
    )]
    pub workers: i32,

    #[arg(
        long,
        default_value_t = 5,
        help = "Attempts for a device write before a conflict is reported"
    )]
    pub retry_steps: u32,

    #[arg(long, default_value_t = 10, help = "First conflict backoff in milliseconds")]
    pub retry_initial_backoff_ms: u64,

    #[arg(long, default_value_t = 2.0, help = "Backoff growth factor between conflicts")]
    pub retry_backoff_factor: f64,

    #[arg(long, default_value_t = 1000, help = "Upper bound of a conflict backoff in milliseconds")]
    pub retry_max_backoff_ms: u64,

    #[arg(
        long,
        default_value_t = 30,
        help = "Seconds between periodic reconciles of a healthy pool"
    )]
    pub resync_interval_secs: u64,

    #[arg(
        long,
        default_value_t = 10,
        help = "Seconds before a pool is retried after a transient error"
    )]
    pub error_requeue_secs: u64,

    #[arg(
        long,
        default_value_t = 300,
        help = "Seconds before a pool with an invalid spec is retried"
    )]
    pub config_error_requeue_secs: u64,

    #[arg(
        long,
        help = "Maintain used and available capacity from pod requests",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_usage_accounting: bool,
}

/// When a pool is reconciled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    pub resync_interval: Duration,
    pub error: Duration,
    pub config_error: Duration,
}

impl RunArgs {
    pub fn worker_limit(&self) -> usize {
        usize::try_from(self.workers)
            .ok()
            .filter(|w| *w > 0)
            .unwrap_or(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            steps: self.retry_steps.max(1),
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            factor: self.retry_backoff_factor,
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
        }
    }

    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            error: Duration::from_secs(self.error_requeue_secs),
            config_error: Duration::from_secs(self.config_error_requeue_secs),
        }
    }
}
