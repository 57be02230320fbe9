use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api_types::ClusterGpuPool;
use api_types::GpuPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::controller::run_selection_controller;
use crate::app::controller::run_usage_controller;
use crate::app::controller::Context;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and stopping the controllers
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    /// Start one selection controller per pool kind, plus the usage
    /// controllers when enabled
    pub fn spawn_all_tasks(&mut self, ctx: &Arc<Context>, enable_usage_accounting: bool) {
        self.tasks.push(tokio::spawn({
            let ctx = ctx.clone();
            async move {
                tracing::info!("Starting GPUPool selection controller");
                run_selection_controller::<GpuPool>(ctx).await;
                tracing::info!("GPUPool selection controller stopped");
            }
        }));
        self.tasks.push(tokio::spawn({
            let ctx = ctx.clone();
            async move {
                tracing::info!("Starting ClusterGPUPool selection controller");
                run_selection_controller::<ClusterGpuPool>(ctx).await;
                tracing::info!("ClusterGPUPool selection controller stopped");
            }
        }));

        if !enable_usage_accounting {
            tracing::info!("Usage accounting disabled");
            return;
        }

        self.tasks.push(tokio::spawn({
            let ctx = ctx.clone();
            async move {
                tracing::info!("Starting GPUPool usage controller");
                run_usage_controller::<GpuPool>(ctx).await;
                tracing::info!("GPUPool usage controller stopped");
            }
        }));
        self.tasks.push(tokio::spawn({
            let ctx = ctx.clone();
            async move {
                tracing::info!("Starting ClusterGPUPool usage controller");
                run_usage_controller::<ClusterGpuPool>(ctx).await;
                tracing::info!("ClusterGPUPool usage controller stopped");
            }
        }));
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, stopping controllers");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Controller task failed: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Controller stopped unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
