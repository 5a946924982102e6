//! meshnet CNI daemon

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{kubectl_apply, resolve, Component, ComponentKind, Handles};
use crate::context::Context;
use crate::error::Result;
use crate::exec::Tools;
use crate::k8s::{wait_for_daemon_set, ClusterClient};

pub const NAMESPACE: &str = "meshnet";
pub const DAEMON_SET: &str = "meshnet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshnetConfig {
    pub manifest: PathBuf,
}

impl Default for MeshnetConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("manifests/meshnet/manifest.yaml"),
        }
    }
}

impl MeshnetConfig {
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.manifest);
    }
}

pub struct MeshnetSpec {
    config: MeshnetConfig,
    handles: Handles,
}

impl MeshnetSpec {
    pub fn new(config: MeshnetConfig, tools: Tools) -> Self {
        Self {
            config,
            handles: Handles::new(tools, "meshnet"),
        }
    }
}

#[async_trait]
impl Component for MeshnetSpec {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Meshnet
    }

    fn set_cluster_client(&mut self, client: Arc<dyn ClusterClient>) {
        self.handles.set_cluster(client);
    }

    #[instrument(skip_all)]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        kubectl_apply(&self.handles.tools, &self.config.manifest).await?;
        info!(manifest = %self.config.manifest.display(), "Applied meshnet manifest");
        self.handles.mark_deployed();
        Ok(())
    }

    #[instrument(skip_all)]
    async fn healthy(&mut self, ctx: &Context) -> Result<()> {
        self.handles.ensure_deployed()?;
        let client = self.handles.cluster()?;
        wait_for_daemon_set(ctx, client.as_ref(), NAMESPACE, DAEMON_SET).await
    }
}
