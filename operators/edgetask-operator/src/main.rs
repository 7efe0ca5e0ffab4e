use anyhow::Result;
use clap::Parser;
use edgetask_operator::config::{Cli, OperatorConfig};
use edgetask_operator::{crd, EdgeTaskOperator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.print_crds {
        print!("{}", crd::crd_manifests()?);
        return Ok(());
    }

    let config = OperatorConfig::load(&cli)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("收到退出信号，正在停止");
                signal.cancel();
            }
            Err(e) => error!("监听退出信号失败: {}", e),
        }
    });

    let operator = EdgeTaskOperator::new(config).await?;
    operator.run(shutdown).await
}
