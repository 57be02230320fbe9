use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::app::controller::Context;
use crate::app::tasks::Tasks;
use crate::config::RunArgs;
use crate::domain::selection::SelectionSyncHandler;
use crate::domain::usage::UsageAccountant;
use crate::infrastructure::k8s::KubeStore;
use crate::infrastructure::kube_client::init_kube_client;

/// The operator process: shared reconcile context plus its run arguments
pub struct Operator {
    context: Arc<Context>,
    run_args: RunArgs,
    cancellation_token: CancellationToken,
}

impl Operator {
    /// Connect to the cluster and wire the handlers to the API server
    pub async fn build(run_args: RunArgs) -> Result<Self> {
        let client = init_kube_client(run_args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let store = Arc::new(KubeStore::new(client.clone()));
        let cancellation_token = CancellationToken::new();

        let workers = run_args.worker_limit();
        tracing::info!(workers, "Reconcile concurrency configured");

        let context = Arc::new(Context {
            client,
            selection: SelectionSyncHandler::new(store.clone(), run_args.retry_policy()),
            usage: UsageAccountant::new(store),
            permits: Semaphore::new(workers),
            requeue: run_args.requeue_policy(),
            cancellation_token: cancellation_token.clone(),
        });

        Ok(Self {
            context,
            run_args,
            cancellation_token,
        })
    }

    /// Run all controllers until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting controllers...");

        let mut tasks = Tasks::new(self.cancellation_token.clone());
        tasks.spawn_all_tasks(&self.context, self.run_args.enable_usage_accounting);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Operator run completed");
        Ok(())
    }
}
