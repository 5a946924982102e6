//! Container-runtime network introspection
//!
//! The cluster nodes run as containers on a runtime network (`kind` by
//! default). Its IPAM configuration is what the load-balancer pool is carved
//! out of.

mod docker;
mod pool;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::ExecError;

pub use docker::DockerNetworkClient;
pub use pool::{parse_ipv4_subnet, AddressPool, PoolError, POOL_HOST_OFFSET};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed to decode network description: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A runtime network as reported by `docker network inspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkResource {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "IPAM", default)]
    pub ipam: Ipam,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ipam {
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub config: Option<Vec<IpamConfig>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamConfig {
    #[serde(default)]
    pub subnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

impl NetworkResource {
    pub fn new(name: impl Into<String>, subnets: &[&str]) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            ipam: Ipam {
                driver: "default".to_string(),
                config: Some(
                    subnets
                        .iter()
                        .map(|s| IpamConfig {
                            subnet: s.to_string(),
                            gateway: None,
                        })
                        .collect(),
                ),
            },
        }
    }

    /// IPv4 subnets in the order the runtime lists them
    pub fn ipv4_subnets(&self) -> impl Iterator<Item = &str> {
        self.ipam
            .config
            .iter()
            .flatten()
            .map(|c| c.subnet.as_str())
            .filter(|s| parse_ipv4_subnet(s).is_ok())
    }
}

/// Lists the networks known to the container runtime
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn list_networks(&self) -> Result<Vec<NetworkResource>, NetworkError>;
}

/// Fixed answer for tests and dry runs
#[derive(Debug, Clone)]
pub struct StaticNetworkClient {
    networks: Result<Vec<NetworkResource>, String>,
}

impl StaticNetworkClient {
    pub fn new(networks: Vec<NetworkResource>) -> Self {
        Self {
            networks: Ok(networks),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            networks: Err(message.into()),
        }
    }
}

#[async_trait]
impl NetworkClient for StaticNetworkClient {
    async fn list_networks(&self) -> Result<Vec<NetworkResource>, NetworkError> {
        match &self.networks {
            Ok(networks) => Ok(networks.clone()),
            Err(message) => Err(NetworkError::Exec(ExecError::Failed {
                command: "docker network ls -q".to_string(),
                code: Some(1),
                stderr: message.clone(),
            })),
        }
    }
}
