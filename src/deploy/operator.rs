//! Vendor network-element operators
//!
//! SR Linux and cEOS lab only need their operator manifest applied and the
//! controller manager rolled out, so one spec serves both. IxiaTG shares the
//! apply and wait steps but carries its own release config map.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{kubectl_apply, resolve, Component, ComponentKind, Handles};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::Tools;
use crate::k8s::{wait_for_deployment, ClusterClient};

/// Where an operator's controller manager runs
#[derive(Debug, Clone, Copy)]
pub(crate) struct OperatorTarget {
    pub(crate) namespace: &'static str,
    pub(crate) deployment: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    SrLinux,
    CeosLab,
}

impl Vendor {
    fn kind(self) -> ComponentKind {
        match self {
            Vendor::SrLinux => ComponentKind::SrLinux,
            Vendor::CeosLab => ComponentKind::CeosLab,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Vendor::SrLinux => "srlinux",
            Vendor::CeosLab => "ceoslab",
        }
    }

    fn default_manifest(self) -> &'static str {
        match self {
            Vendor::SrLinux => "manifests/controllers/srlinux/manifest.yaml",
            Vendor::CeosLab => "manifests/controllers/ceoslab/manifest.yaml",
        }
    }

    fn target(self) -> OperatorTarget {
        match self {
            Vendor::SrLinux => OperatorTarget {
                namespace: "srlinux-controller",
                deployment: "srlinux-controller-controller-manager",
            },
            Vendor::CeosLab => OperatorTarget {
                namespace: "arista-ceoslab-operator-system",
                deployment: "arista-ceoslab-operator-controller-manager",
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Operator manifest; each vendor has its own default
    pub operator: Option<PathBuf>,
}

impl OperatorConfig {
    pub(crate) fn resolve_paths(&mut self, vendor: Vendor, base: &Path) {
        let path = self
            .operator
            .get_or_insert_with(|| PathBuf::from(vendor.default_manifest()));
        resolve(base, path);
    }
}

pub struct OperatorSpec {
    vendor: Vendor,
    manifest: PathBuf,
    handles: Handles,
}

impl OperatorSpec {
    pub fn new(vendor: Vendor, config: OperatorConfig, tools: Tools) -> Self {
        let manifest = config
            .operator
            .unwrap_or_else(|| PathBuf::from(vendor.default_manifest()));
        Self {
            vendor,
            manifest,
            handles: Handles::new(tools, vendor.name()),
        }
    }
}

#[async_trait]
impl Component for OperatorSpec {
    fn kind(&self) -> ComponentKind {
        self.vendor.kind()
    }

    fn set_cluster_client(&mut self, client: Arc<dyn ClusterClient>) {
        self.handles.set_cluster(client);
    }

    #[instrument(skip_all, fields(vendor = self.vendor.name()))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        apply_operator(&self.handles, &self.manifest).await?;
        self.handles.mark_deployed();
        Ok(())
    }

    #[instrument(skip_all, fields(vendor = self.vendor.name()))]
    async fn healthy(&mut self, ctx: &Context) -> Result<()> {
        wait_operator(ctx, &self.handles, self.vendor.target()).await
    }
}

pub(crate) async fn apply_operator(handles: &Handles, manifest: &Path) -> Result<()> {
    kubectl_apply(&handles.tools, manifest)
        .await
        .map_err(Error::step("failed to apply operator"))?;
    info!(manifest = %manifest.display(), "Applied operator manifest");
    Ok(())
}

/// Wait for the controller manager once the operator has been deployed
pub(crate) async fn wait_operator(
    ctx: &Context,
    handles: &Handles,
    target: OperatorTarget,
) -> Result<()> {
    handles.ensure_deployed()?;
    let client = handles.cluster()?;
    wait_for_deployment(ctx, client.as_ref(), target.namespace, target.deployment).await
}
