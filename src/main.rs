use std::sync::Arc;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use networksim_deploy::{config::Config, host::LocalHost, Context, DeploymentConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if config.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let action = std::env::args().nth(1).unwrap_or_else(|| "deploy".to_string());

    let deployment_config = DeploymentConfig::load(&config.deployment_file)?;
    let kubeconfig = deployment_config
        .kubeconfig()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config.kubeconfig.clone());
    tracing::debug!("Deployment: {}", deployment_config.describe());

    let mut deployment = deployment_config
        .into_deployment(Arc::new(LocalHost::new()))
        .with_health_timeout(config.health_timeout());

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match action.as_str() {
        "deploy" => deployment.deploy(&ctx, &kubeconfig).await?,
        "delete" => deployment.delete().await?,
        "healthy" => {
            deployment.connect(&kubeconfig).await?;
            deployment.healthy(&ctx).await?;
        }
        other => bail!("unknown action {:?}, expected deploy, delete or healthy", other),
    }

    tracing::info!(action = %action, "Done");
    Ok(())
}
