//! MetalLB load balancer
//!
//! `deploy` lays down the namespace, the memberlist secret and the controller
//! manifest. `healthy` carves an address pool out of the runtime network the
//! nodes sit on, publishes it as MetalLB's config map, and waits for the
//! controller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ensure_namespace, kubectl_apply, resolve, Component, ComponentKind, Handles};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::Tools;
use crate::k8s::{wait_for_deployment, ClusterClient};
use crate::network::{AddressPool, DockerNetworkClient, NetworkClient};

pub const NAMESPACE: &str = "metallb-system";
pub const MEMBERLIST_SECRET: &str = "memberlist";
pub const CONFIG_MAP: &str = "config";
pub const CONFIG_KEY: &str = "config";
pub const CONTROLLER: &str = "controller";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetalLbConfig {
    pub manifest: PathBuf,
    /// Addresses handed to MetalLB beyond the pool's first one
    pub ip_count: u32,
    /// Runtime network the cluster nodes are attached to
    pub network: String,
}

impl Default for MetalLbConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("manifests/metallb/manifest.yaml"),
            ip_count: 100,
            network: "kind".to_string(),
        }
    }
}

impl MetalLbConfig {
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.manifest);
    }
}

/// Payload stored under the `config` key of MetalLB's config map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(rename = "address-pools")]
    pub address_pools: Vec<AddressPoolEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPoolEntry {
    pub name: String,
    pub protocol: String,
    pub addresses: Vec<String>,
}

/// Render a single layer 2 pool named `default`
pub fn render_pools(pool: &AddressPool) -> Result<String> {
    let config = LoadBalancerConfig {
        address_pools: vec![AddressPoolEntry {
            name: "default".to_string(),
            protocol: "layer2".to_string(),
            addresses: vec![pool.to_string()],
        }],
    };
    serde_yaml::to_string(&config).map_err(|e| Error::Render {
        what: "metallb config",
        message: e.to_string(),
    })
}

/// Read back every address range in a rendered payload
pub fn parse_pools(payload: &str) -> Result<Vec<AddressPool>> {
    let config: LoadBalancerConfig =
        serde_yaml::from_str(payload).map_err(|e| Error::Render {
            what: "metallb config",
            message: e.to_string(),
        })?;
    let mut pools = Vec::new();
    for entry in &config.address_pools {
        for range in &entry.addresses {
            pools.push(AddressPool::parse_range(range)?);
        }
    }
    Ok(pools)
}

pub struct MetalLbSpec {
    config: MetalLbConfig,
    handles: Handles,
    network: Arc<dyn NetworkClient>,
}

impl MetalLbSpec {
    /// Networks are discovered through the docker CLI on the same executor
    pub fn new(config: MetalLbConfig, tools: Tools) -> Self {
        let network = Arc::new(DockerNetworkClient::new(tools.execer.clone()));
        Self {
            config,
            handles: Handles::new(tools, "metallb"),
            network,
        }
    }

    pub fn with_network_client(mut self, network: Arc<dyn NetworkClient>) -> Self {
        self.network = network;
        self
    }

    async fn ensure_memberlist_secret(&self, client: &dyn ClusterClient) -> Result<()> {
        let existing = client
            .get_secret(NAMESPACE, MEMBERLIST_SECRET)
            .await
            .map_err(|source| Error::SecretGet {
                namespace: NAMESPACE.to_string(),
                name: MEMBERLIST_SECRET.to_string(),
                source,
            })?;
        if existing.is_some() {
            debug!("Memberlist secret already exists");
            return Ok(());
        }

        let key = STANDARD.encode(Uuid::new_v4().as_bytes());
        let mut secret = Secret {
            data: Some(BTreeMap::from([(
                "secretkey".to_string(),
                ByteString(key.into_bytes()),
            )])),
            ..Default::default()
        };
        secret.metadata.name = Some(MEMBERLIST_SECRET.to_string());
        secret.metadata.namespace = Some(NAMESPACE.to_string());

        client
            .create_secret(NAMESPACE, &secret)
            .await
            .map_err(|source| Error::SecretCreate {
                namespace: NAMESPACE.to_string(),
                name: MEMBERLIST_SECRET.to_string(),
                source,
            })?;
        info!("Created memberlist secret");
        Ok(())
    }

    /// Pool carved from the first IPv4 subnet of the configured network
    async fn address_pool(&self) -> Result<AddressPool> {
        let networks = self
            .network
            .list_networks()
            .await
            .map_err(Error::NetworkList)?;
        let network = networks
            .iter()
            .find(|n| n.name == self.config.network)
            .ok_or_else(|| Error::NetworkNotFound(self.config.network.clone()))?;
        let subnet = network
            .ipv4_subnets()
            .next()
            .ok_or_else(|| Error::NoIpv4Subnet(self.config.network.clone()))?;
        let pool = AddressPool::allocate(subnet, self.config.ip_count)?;
        debug!(subnet, pool = %pool, "Allocated load balancer pool");
        Ok(pool)
    }

    async fn write_config_map(&self, client: &dyn ClusterClient, payload: String) -> Result<()> {
        let wrap = |source| Error::ConfigMap {
            namespace: NAMESPACE.to_string(),
            name: CONFIG_MAP.to_string(),
            source,
        };
        let data = BTreeMap::from([(CONFIG_KEY.to_string(), payload)]);
        match client
            .get_config_map(NAMESPACE, CONFIG_MAP)
            .await
            .map_err(wrap)?
        {
            Some(mut existing) => {
                existing.data = Some(data);
                client
                    .replace_config_map(NAMESPACE, &existing)
                    .await
                    .map_err(wrap)?;
            }
            None => {
                let mut config_map = ConfigMap {
                    data: Some(data),
                    ..Default::default()
                };
                config_map.metadata.name = Some(CONFIG_MAP.to_string());
                config_map.metadata.namespace = Some(NAMESPACE.to_string());
                client
                    .create_config_map(NAMESPACE, &config_map)
                    .await
                    .map_err(wrap)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Component for MetalLbSpec {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MetalLb
    }

    fn set_cluster_client(&mut self, client: Arc<dyn ClusterClient>) {
        self.handles.set_cluster(client);
    }

    #[instrument(skip_all)]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        let client = self.handles.cluster()?;
        ensure_namespace(client.as_ref(), NAMESPACE).await?;
        self.ensure_memberlist_secret(client.as_ref()).await?;
        kubectl_apply(&self.handles.tools, &self.config.manifest).await?;
        info!(manifest = %self.config.manifest.display(), "Applied MetalLB manifest");
        self.handles.mark_deployed();
        Ok(())
    }

    #[instrument(skip_all, fields(network = %self.config.network, ip_count = self.config.ip_count))]
    async fn healthy(&mut self, ctx: &Context) -> Result<()> {
        self.handles.ensure_deployed()?;
        let client = self.handles.cluster()?;
        let pool = self.address_pool().await?;
        self.write_config_map(client.as_ref(), render_pools(&pool)?)
            .await?;
        info!(pool = %pool, "Published address pool");
        wait_for_deployment(ctx, client.as_ref(), NAMESPACE, CONTROLLER).await
    }
}
