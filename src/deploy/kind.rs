//! `kind` cluster provisioning
//!
//! Creates (or reuses) the cluster, then optionally hands the nodes pull
//! credentials for Google Artifact Registry and preloads container images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{kubectl_apply, resolve, Component, ComponentKind, Handles};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::Tools;
use crate::k8s::ClusterClient;

/// Docker client config that keeps credentials in the file itself
const DOCKER_CONFIG: &str = r#"{"credsStore": ""}"#;

/// Where kubelet looks for registry credentials on a node
const KUBELET_CONFIG_PATH: &str = "/var/lib/kubelet/config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig {
    pub name: String,
    /// Reuse a cluster of the same name instead of failing on create
    pub recycle: bool,
    pub image: Option<String>,
    pub retain: bool,
    /// Seconds to let `kind` wait for the control plane
    pub wait_secs: Option<u64>,
    pub kubeconfig: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub google_artifact_registries: Vec<String>,
    /// Source image reference to the tag it is loaded under
    pub container_images: BTreeMap<String, String>,
    pub additional_manifests: Vec<PathBuf>,
}

impl Default for KindConfig {
    fn default() -> Self {
        Self {
            name: "kne".to_string(),
            recycle: false,
            image: None,
            retain: false,
            wait_secs: None,
            kubeconfig: None,
            config_file: None,
            google_artifact_registries: Vec::new(),
            container_images: BTreeMap::new(),
            additional_manifests: Vec::new(),
        }
    }
}

impl KindConfig {
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        if let Some(path) = self.config_file.as_mut() {
            resolve(base, path);
        }
        for path in &mut self.additional_manifests {
            resolve(base, path);
        }
    }
}

pub struct KindSpec {
    config: KindConfig,
    handles: Handles,
}

impl KindSpec {
    pub fn new(config: KindConfig, tools: Tools) -> Self {
        Self {
            config,
            handles: Handles::new(tools, "kind"),
        }
    }

    pub fn config(&self) -> &KindConfig {
        &self.config
    }

    /// Kubeconfig context `kind` writes for this cluster
    pub fn kube_context(&self) -> String {
        format!("kind-{}", self.config.name)
    }

    async fn cluster_exists(&self) -> Result<bool> {
        let out = self
            .handles
            .tools
            .execer
            .exec("kind", &["get", "clusters"])
            .await
            .map_err(Error::step("failed to get clusters"))?;
        Ok(out.lines().any(|line| line.trim() == self.config.name))
    }

    async fn create_cluster(&self) -> Result<()> {
        let wait = self.config.wait_secs.map(|secs| format!("{}s", secs));
        let kubeconfig = self
            .config
            .kubeconfig
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let config_file = self
            .config
            .config_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let mut args = vec!["create", "cluster", "--name", self.config.name.as_str()];
        if let Some(image) = &self.config.image {
            args.extend(["--image", image.as_str()]);
        }
        if self.config.retain {
            args.push("--retain");
        }
        if let Some(wait) = &wait {
            args.extend(["--wait", wait.as_str()]);
        }
        if let Some(kubeconfig) = &kubeconfig {
            args.extend(["--kubeconfig", kubeconfig.as_str()]);
        }
        if let Some(config_file) = &config_file {
            args.extend(["--config", config_file.as_str()]);
        }

        self.handles
            .tools
            .execer
            .exec("kind", &args)
            .await
            .map_err(Error::step("failed to create cluster"))?;
        info!(cluster = %self.config.name, "Created kind cluster");
        Ok(())
    }

    /// Log every node into the configured registries using a throwaway
    /// docker config directory, private to the current user
    async fn setup_registry_access(&self) -> Result<()> {
        let dir = tempfile::Builder::new()
            .prefix("kind-docker-")
            .tempdir()
            .map_err(|source| Error::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let result = self.push_registry_credentials(dir.path()).await;
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!(dir = %path.display(), error = %e, "Failed to remove docker config dir");
        }
        result
    }

    async fn push_registry_credentials(&self, dir: &Path) -> Result<()> {
        let execer = &self.handles.tools.execer;
        let config_path = dir.join("config.json");
        tokio::fs::write(&config_path, DOCKER_CONFIG)
            .await
            .map_err(|source| Error::Io {
                path: config_path.clone(),
                source,
            })?;

        let token = execer
            .exec("gcloud", &["auth", "print-access-token"])
            .await
            .map_err(Error::step("failed to get access token"))?;
        let token = token.trim();

        let dir_arg = dir.to_string_lossy().into_owned();
        for registry in &self.config.google_artifact_registries {
            let url = format!("https://{}", registry);
            execer
                .exec_with_input(
                    "docker",
                    &[
                        "--config",
                        dir_arg.as_str(),
                        "login",
                        "-u",
                        "oauth2accesstoken",
                        "--password-stdin",
                        url.as_str(),
                    ],
                    token,
                )
                .await
                .map_err(Error::step("failed to login to docker"))?;
            debug!(registry = %registry, "Logged in to registry");
        }

        let nodes = execer
            .exec("kind", &["get", "nodes", "--name", self.config.name.as_str()])
            .await
            .map_err(Error::step("failed to get nodes"))?;

        let config_arg = config_path.to_string_lossy().into_owned();
        for node in nodes.split_whitespace() {
            let target = format!("{}:{}", node, KUBELET_CONFIG_PATH);
            execer
                .exec("docker", &["cp", config_arg.as_str(), target.as_str()])
                .await
                .map_err(Error::step("failed to cp config to node"))?;
            execer
                .exec("docker", &["exec", node, "systemctl", "restart", "kubelet"])
                .await
                .map_err(Error::step("failed to restart kubelet"))?;
            debug!(node, "Node credentials updated");
        }

        info!(
            registries = self.config.google_artifact_registries.len(),
            "Configured registry access on cluster nodes"
        );
        Ok(())
    }

    async fn load_container_images(&self) -> Result<()> {
        let execer = &self.handles.tools.execer;
        for (src, dst) in &self.config.container_images {
            execer
                .exec("docker", &["pull", src.as_str()])
                .await
                .map_err(Error::step("failed to pull"))?;
            execer
                .exec("docker", &["tag", src.as_str(), dst.as_str()])
                .await
                .map_err(Error::step("failed to tag"))?;
            execer
                .exec(
                    "kind",
                    &[
                        "load",
                        "docker-image",
                        dst.as_str(),
                        "--name",
                        self.config.name.as_str(),
                    ],
                )
                .await
                .map_err(Error::step("failed to load"))?;
            debug!(src = %src, dst = %dst, "Loaded image into cluster");
        }
        Ok(())
    }
}

#[async_trait]
impl Component for KindSpec {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Kind
    }

    fn set_cluster_client(&mut self, client: Arc<dyn ClusterClient>) {
        self.handles.set_cluster(client);
    }

    #[instrument(skip_all, fields(cluster = %self.config.name))]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        if self.handles.tools.host.look_path("kind").is_none() {
            return Err(Error::MissingDependency("kind".to_string()));
        }

        if self.config.recycle && self.cluster_exists().await? {
            info!("Reusing existing kind cluster");
            self.handles.mark_deployed();
            return Ok(());
        }

        self.create_cluster().await?;
        if !self.config.google_artifact_registries.is_empty() {
            self.setup_registry_access().await?;
        }
        if !self.config.container_images.is_empty() {
            self.load_container_images().await?;
        }
        for manifest in &self.config.additional_manifests {
            kubectl_apply(&self.handles.tools, manifest)
                .await
                .map_err(Error::step("failed to apply additional manifest"))?;
        }

        self.handles.mark_deployed();
        Ok(())
    }

    async fn healthy(&mut self, _ctx: &Context) -> Result<()> {
        self.handles.ensure_deployed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{FakeExecer, FakeHost};

    fn spec(config: KindConfig, execer: Arc<FakeExecer>) -> KindSpec {
        KindSpec::new(config, Tools::new(execer, Arc::new(FakeHost::new())))
    }

    #[tokio::test]
    async fn test_create_flags() {
        let execer = Arc::new(FakeExecer::succeeding(1));
        let config = KindConfig {
            name: "test".to_string(),
            image: Some("kindest/node:v1.28.0".to_string()),
            retain: true,
            wait_secs: Some(60),
            kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
            config_file: Some(PathBuf::from("/tmp/kind.yaml")),
            ..Default::default()
        };
        let mut kind = spec(config, execer.clone());
        kind.deploy(&Context::background()).await.unwrap();
        assert_eq!(
            execer.calls(),
            vec![
                "kind create cluster --name test --image kindest/node:v1.28.0 --retain \
                 --wait 60s --kubeconfig /tmp/kubeconfig --config /tmp/kind.yaml"
            ]
        );
    }

    #[tokio::test]
    async fn test_recycle_existing_cluster() {
        let execer = Arc::new(FakeExecer::new(vec![Ok("other\ntest\n")]));
        let config = KindConfig {
            name: "test".to_string(),
            recycle: true,
            ..Default::default()
        };
        let mut kind = spec(config, execer.clone());
        kind.deploy(&Context::background()).await.unwrap();
        assert_eq!(execer.calls(), vec!["kind get clusters"]);
        kind.healthy(&Context::background()).await.unwrap();
    }

    #[tokio::test]
    async fn test_healthy_requires_deploy() {
        let mut kind = spec(KindConfig::default(), Arc::new(FakeExecer::default()));
        let err = kind.healthy(&Context::background()).await.unwrap_err();
        assert!(matches!(err, Error::NotDeployed("kind")));
    }

    #[test]
    fn test_kube_context() {
        let kind = spec(KindConfig::default(), Arc::new(FakeExecer::default()));
        assert_eq!(kind.kube_context(), "kind-kne");
    }
}
