use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment file used when none is given on the command line
    #[serde(default)]
    pub deployment_file: Option<PathBuf>,

    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    /// Kubeconfig to reach the cluster through; kind's default otherwise
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_health_timeout_secs() -> u64 {
    600
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(Self::from_settings(config))
    }

    fn from_settings(config: config::Config) -> Self {
        config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid configuration, using defaults");
            Config::default()
        })
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_file: None,
            health_timeout_secs: default_health_timeout_secs(),
            kubeconfig: None,
        }
    }
}
