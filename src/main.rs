use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netsim_deploy::{config::Config, Context, Deployment, DeploymentFile, Tools};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.deployment_file.clone())
        .context("usage: netsim-deploy <deployment.yaml> (or set DEPLOYMENT_FILE)")?;

    let file = DeploymentFile::load(&path).await?;
    tracing::info!(file = %path.display(), "Deployment file loaded");

    let mut deployment = Deployment::new(file, Tools::system())
        .with_health_timeout(config.health_timeout())
        .with_kubeconfig(config.kubeconfig.clone());

    // Ctrl-C stops any readiness wait in progress
    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling deployment");
            interrupt.cancel();
        }
    });

    deployment.deploy(&ctx).await?;
    tracing::info!("Deployment complete");
    Ok(())
}
