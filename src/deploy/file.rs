//! Deployment files and the orchestrator that runs them

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{
    Component, IxiaTgConfig, IxiaTgSpec, KindConfig, KindSpec, MeshnetConfig, MeshnetSpec,
    MetalLbConfig, MetalLbSpec, OperatorConfig, OperatorSpec, Vendor,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::Tools;
use crate::k8s::{ClusterClient, KubeClusterClient};

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ClusterEntry {
    Kind(KindConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum IngressEntry {
    #[serde(rename = "MetalLB")]
    MetalLb(MetalLbConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum CniEntry {
    Meshnet(MeshnetConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ControllerEntry {
    #[serde(rename = "IxiaTG")]
    IxiaTg(IxiaTgConfig),
    #[serde(rename = "SRLinux")]
    SrLinux(OperatorConfig),
    #[serde(rename = "CEOSLab")]
    CeosLab(OperatorConfig),
}

/// Everything one run deploys, as written in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentFile {
    pub cluster: ClusterEntry,
    pub ingress: IngressEntry,
    pub cni: CniEntry,
    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,
}

impl DeploymentFile {
    /// Parse a deployment file; relative paths inside it are taken from
    /// `base`
    pub fn parse(contents: &str, base: &Path) -> std::result::Result<Self, serde_yaml::Error> {
        let mut file: DeploymentFile = serde_yaml::from_str(contents)?;
        file.resolve_paths(base);
        Ok(file)
    }

    /// Read and parse the file at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::DeploymentFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base).map_err(|e| Error::DeploymentFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn resolve_paths(&mut self, base: &Path) {
        let ClusterEntry::Kind(kind) = &mut self.cluster;
        kind.resolve_paths(base);
        let IngressEntry::MetalLb(metallb) = &mut self.ingress;
        metallb.resolve_paths(base);
        let CniEntry::Meshnet(meshnet) = &mut self.cni;
        meshnet.resolve_paths(base);
        for controller in &mut self.controllers {
            match controller {
                ControllerEntry::IxiaTg(c) => c.resolve_paths(base),
                ControllerEntry::SrLinux(c) => c.resolve_paths(Vendor::SrLinux, base),
                ControllerEntry::CeosLab(c) => c.resolve_paths(Vendor::CeosLab, base),
            }
        }
    }
}

/// A full deployment: the cluster, then the components that run on it
pub struct Deployment {
    cluster: KindSpec,
    ingress: Box<dyn Component>,
    cni: Box<dyn Component>,
    controllers: Vec<Box<dyn Component>>,
    health_timeout: Duration,
    kubeconfig: Option<PathBuf>,
}

impl Deployment {
    pub fn new(file: DeploymentFile, tools: Tools) -> Self {
        let ClusterEntry::Kind(kind) = file.cluster;
        let ingress: Box<dyn Component> = match file.ingress {
            IngressEntry::MetalLb(c) => Box::new(MetalLbSpec::new(c, tools.clone())),
        };
        let cni: Box<dyn Component> = match file.cni {
            CniEntry::Meshnet(c) => Box::new(MeshnetSpec::new(c, tools.clone())),
        };
        let controllers = file
            .controllers
            .into_iter()
            .map(|entry| -> Box<dyn Component> {
                match entry {
                    ControllerEntry::IxiaTg(c) => Box::new(IxiaTgSpec::new(c, tools.clone())),
                    ControllerEntry::SrLinux(c) => {
                        Box::new(OperatorSpec::new(Vendor::SrLinux, c, tools.clone()))
                    }
                    ControllerEntry::CeosLab(c) => {
                        Box::new(OperatorSpec::new(Vendor::CeosLab, c, tools.clone()))
                    }
                }
            })
            .collect();
        Self {
            cluster: KindSpec::new(kind, tools),
            ingress,
            cni,
            controllers,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            kubeconfig: None,
        }
    }

    /// Bound on each component's readiness wait
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Kubeconfig to connect through when the cluster config names none
    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    /// Create the cluster, connect to it, then bring up every component
    #[instrument(skip_all, fields(cluster = %self.cluster.config().name))]
    pub async fn deploy(&mut self, ctx: &Context) -> Result<()> {
        self.cluster.deploy(ctx).await?;
        self.cluster.healthy(ctx).await?;

        let kubeconfig = self
            .cluster
            .config()
            .kubeconfig
            .clone()
            .or_else(|| self.kubeconfig.clone());
        let client =
            KubeClusterClient::for_context(&self.cluster.kube_context(), kubeconfig.as_deref())
                .await?;
        self.deploy_components(ctx, Arc::new(client)).await
    }

    /// Bring up every component on a cluster that already exists
    pub async fn deploy_components(
        &mut self,
        ctx: &Context,
        client: Arc<dyn ClusterClient>,
    ) -> Result<()> {
        self.cluster.set_cluster_client(client.clone());
        for component in self.components_mut() {
            component.set_cluster_client(client.clone());
        }

        for component in self.components_mut() {
            info!(component = %component.kind(), "Deploying");
            component.deploy(ctx).await?;
        }

        let health_timeout = self.health_timeout;
        for component in self.components_mut() {
            let kind = component.kind();
            info!(component = %kind, "Waiting for component to become healthy");
            component.healthy(&ctx.with_timeout(health_timeout)).await?;
            info!(component = %kind, "Component healthy");
        }
        Ok(())
    }

    fn components_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Component>> {
        [&mut self.ingress, &mut self.cni]
            .into_iter()
            .chain(self.controllers.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
cluster:
  kind: Kind
  spec:
    name: kne
    recycle: true
    google_artifact_registries:
      - us-west1-docker.pkg.dev
    container_images:
      us-west1-docker.pkg.dev/proj/ceos:latest: ceos:latest
ingress:
  kind: MetalLB
  spec:
    manifest: metallb/manifest.yaml
    ip_count: 100
cni:
  kind: Meshnet
  spec:
    manifest: /abs/meshnet.yaml
controllers:
  - kind: IxiaTG
    spec:
      operator: keysight/operator.yaml
      config_map:
        release: "0.0.1-9999"
        images:
          - name: controller
            path: ghcr.io/open-traffic-generator/ixia-c-controller
            tag: "0.0.1-9999"
  - kind: SRLinux
    spec:
      operator: srlinux.yaml
"#;

    #[test]
    fn test_parse_deployment_file() {
        let file = DeploymentFile::parse(FILE, Path::new("/deploy")).unwrap();

        let ClusterEntry::Kind(kind) = &file.cluster;
        assert_eq!(kind.name, "kne");
        assert!(kind.recycle);
        assert_eq!(kind.container_images["us-west1-docker.pkg.dev/proj/ceos:latest"], "ceos:latest");

        let IngressEntry::MetalLb(metallb) = &file.ingress;
        assert_eq!(metallb.manifest, PathBuf::from("/deploy/metallb/manifest.yaml"));
        assert_eq!(metallb.network, "kind");

        let CniEntry::Meshnet(meshnet) = &file.cni;
        assert_eq!(meshnet.manifest, PathBuf::from("/abs/meshnet.yaml"));

        assert_eq!(file.controllers.len(), 2);
        match &file.controllers[0] {
            ControllerEntry::IxiaTg(ixia) => {
                assert_eq!(ixia.operator, PathBuf::from("/deploy/keysight/operator.yaml"));
                let release = ixia.config_map.as_ref().unwrap();
                assert_eq!(release.images[0].name, "controller");
            }
            other => panic!("unexpected controller {:?}", other),
        }
        assert_eq!(
            file.controllers[1],
            ControllerEntry::SrLinux(OperatorConfig {
                operator: Some(PathBuf::from("/deploy/srlinux.yaml")),
            })
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let file = FILE.replace("kind: Meshnet", "kind: Calico");
        assert!(DeploymentFile::parse(&file, Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = DeploymentFile::load(Path::new("/nonexistent/deployment.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeploymentFile { .. }));
    }
}
