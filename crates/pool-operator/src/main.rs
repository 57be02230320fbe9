use anyhow::Context;
use anyhow::Result;
use api_types::ClusterGpuPool;
use api_types::GpuDevice;
use api_types::GpuPool;
use clap::Parser;
use kube::CustomResourceExt;
use pool_operator::app::Operator;
use pool_operator::config::Cli;
use pool_operator::config::Commands;
use pool_operator::config::RunArgs;
use pool_operator::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => run_operator(*run_args).await,
        Commands::Crds => print_crds(),
    }
}

async fn run_operator(run_args: RunArgs) -> Result<()> {
    let _guard = logging::init();

    tracing::info!("Starting pool operator {}", &**version::VERSION);

    let operator = Operator::build(run_args).await?;
    operator.run().await?;

    Ok(())
}

fn print_crds() -> Result<()> {
    for crd in [GpuDevice::crd(), GpuPool::crd(), ClusterGpuPool::crd()] {
        let yaml = serde_yaml::to_string(&crd).context("serialize CRD failed")?;
        println!("---\n{yaml}");
    }
    Ok(())
}
