//! Deployable cluster components
//!
//! Each component type owns a plain config struct (what the deployment file
//! says) and a spec that pairs it with the runtime handles it needs. Every
//! spec implements [`Component`]: `deploy` provisions, `healthy` blocks until
//! the component is operational.

mod file;
mod ixiatg;
mod kind;
mod meshnet;
mod metallb;
mod operator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use strum::{Display, EnumString};
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::{ExecError, Tools};
use crate::k8s::ClusterClient;

pub use file::{
    ClusterEntry, CniEntry, ControllerEntry, Deployment, DeploymentFile, IngressEntry,
};
pub use ixiatg::{IxiaTgConfig, IxiaTgConfigMap, IxiaTgImage, IxiaTgSpec};
pub use kind::{KindConfig, KindSpec};
pub use meshnet::{MeshnetConfig, MeshnetSpec};
pub use metallb::{
    parse_pools, render_pools, AddressPoolEntry, LoadBalancerConfig, MetalLbConfig, MetalLbSpec,
};
pub use operator::{OperatorConfig, OperatorSpec, Vendor};

/// Component types a deployment file can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ComponentKind {
    Kind,
    #[strum(serialize = "MetalLB")]
    MetalLb,
    Meshnet,
    #[strum(serialize = "IxiaTG")]
    IxiaTg,
    #[strum(serialize = "SRLinux")]
    SrLinux,
    #[strum(serialize = "CEOSLab")]
    CeosLab,
}

/// One deployable unit of the cluster
#[async_trait]
pub trait Component: Send {
    fn kind(&self) -> ComponentKind;

    /// Hand over the client for the cluster created earlier in the run.
    /// Components that never talk to the API server ignore it.
    fn set_cluster_client(&mut self, _client: Arc<dyn ClusterClient>) {}

    async fn deploy(&mut self, ctx: &Context) -> Result<()>;

    /// Only valid after a successful [`Component::deploy`]
    async fn healthy(&mut self, ctx: &Context) -> Result<()>;
}

/// Runtime state shared by every spec
pub(crate) struct Handles {
    pub(crate) tools: Tools,
    cluster: Option<Arc<dyn ClusterClient>>,
    deployed: bool,
    component: &'static str,
}

impl Handles {
    pub(crate) fn new(tools: Tools, component: &'static str) -> Self {
        Self {
            tools,
            cluster: None,
            deployed: false,
            component,
        }
    }

    pub(crate) fn set_cluster(&mut self, client: Arc<dyn ClusterClient>) {
        self.cluster = Some(client);
    }

    pub(crate) fn cluster(&self) -> Result<Arc<dyn ClusterClient>> {
        self.cluster
            .clone()
            .ok_or(Error::NoClusterClient(self.component))
    }

    pub(crate) fn mark_deployed(&mut self) {
        self.deployed = true;
    }

    pub(crate) fn ensure_deployed(&self) -> Result<()> {
        if self.deployed {
            Ok(())
        } else {
            Err(Error::NotDeployed(self.component))
        }
    }
}

/// `kubectl apply -f <path>`
pub(crate) async fn kubectl_apply(tools: &Tools, path: &Path) -> Result<String, ExecError> {
    let path = path.to_string_lossy().into_owned();
    debug!(manifest = %path, "Applying manifest");
    tools
        .execer
        .exec("kubectl", &["apply", "-f", path.as_str()])
        .await
}

/// Get-or-create a namespace
pub(crate) async fn ensure_namespace(client: &dyn ClusterClient, name: &str) -> Result<()> {
    let wrap = |source| Error::Namespace {
        name: name.to_string(),
        source,
    };
    if client.get_namespace(name).await.map_err(wrap)?.is_some() {
        debug!(namespace = name, "Namespace already exists");
        return Ok(());
    }
    let mut namespace = Namespace::default();
    namespace.metadata.name = Some(name.to_string());
    client.create_namespace(&namespace).await.map_err(wrap)?;
    info!(namespace = name, "Created namespace");
    Ok(())
}

/// Resolve `path` against `base` unless it is already absolute
pub(crate) fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
