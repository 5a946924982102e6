//! Keysight IxiaTG operator
//!
//! Besides the operator itself, IxiaTG needs a release config map naming the
//! component images. It is either rendered from the deployment file or read
//! from a manifest on disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use super::operator::{apply_operator, wait_operator, OperatorTarget};
use super::{kubectl_apply, resolve, Component, ComponentKind, Handles};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exec::Tools;
use crate::k8s::ClusterClient;

pub(crate) const TARGET: OperatorTarget = OperatorTarget {
    namespace: "ixiatg-op-system",
    deployment: "ixiatg-op-controller-manager",
};

pub const RELEASE_CONFIG_MAP: &str = "ixiatg-release-config";
const RELEASE_KEY: &str = "versions";

/// Release description the operator reads its images from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IxiaTgConfigMap {
    pub release: String,
    pub images: Vec<IxiaTgImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IxiaTgImage {
    pub name: String,
    pub path: String,
    pub tag: String,
}

impl IxiaTgConfigMap {
    /// Wrap the release into the config map manifest the operator expects
    pub fn to_manifest(&self) -> Result<String> {
        let versions = serde_json::to_string_pretty(self).map_err(|e| Error::Render {
            what: "ixiatg release",
            message: e.to_string(),
        })?;
        let mut config_map = ConfigMap {
            data: Some(BTreeMap::from([(RELEASE_KEY.to_string(), versions)])),
            ..Default::default()
        };
        config_map.metadata.name = Some(RELEASE_CONFIG_MAP.to_string());
        config_map.metadata.namespace = Some(TARGET.namespace.to_string());
        serde_yaml::to_string(&config_map).map_err(|e| Error::Render {
            what: "ixiatg config map",
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IxiaTgConfig {
    pub operator: PathBuf,
    /// Release config map manifest used when `config_map` is not given
    pub config_map_path: PathBuf,
    pub config_map: Option<IxiaTgConfigMap>,
}

impl Default for IxiaTgConfig {
    fn default() -> Self {
        Self {
            operator: PathBuf::from("manifests/keysight/ixiatg-operator.yaml"),
            config_map_path: PathBuf::from("manifests/keysight/ixiatg-configmap.yaml"),
            config_map: None,
        }
    }
}

impl IxiaTgConfig {
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.operator);
        resolve(base, &mut self.config_map_path);
    }
}

/// Rendered manifests only need to outlive the `kubectl apply` that reads them
fn write_manifest(contents: &str) -> Result<NamedTempFile> {
    let io_error = |source| Error::Io {
        path: std::env::temp_dir(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("ixiatg-configmap-")
        .suffix(".yaml")
        .tempfile()
        .map_err(io_error)?;
    file.write_all(contents.as_bytes()).map_err(io_error)?;
    file.flush().map_err(io_error)?;
    Ok(file)
}

pub struct IxiaTgSpec {
    config: IxiaTgConfig,
    handles: Handles,
}

impl IxiaTgSpec {
    pub fn new(config: IxiaTgConfig, tools: Tools) -> Self {
        Self {
            config,
            handles: Handles::new(tools, "ixiatg"),
        }
    }

    async fn apply_config_map(&self) -> Result<()> {
        let apply_failed = Error::step("failed to apply configmap");
        match &self.config.config_map {
            Some(release) => {
                let manifest = write_manifest(&release.to_manifest()?)?;
                debug!(release = %release.release, "Rendered release config map");
                kubectl_apply(&self.handles.tools, manifest.path())
                    .await
                    .map_err(apply_failed)?;
            }
            None => {
                let path = &self.config.config_map_path;
                self.handles
                    .tools
                    .host
                    .stat(path)
                    .map_err(|source| Error::ConfigNotFound {
                        component: "ixia",
                        path: path.clone(),
                        source,
                    })?;
                kubectl_apply(&self.handles.tools, path)
                    .await
                    .map_err(apply_failed)?;
            }
        }
        info!("Applied release config map");
        Ok(())
    }
}

#[async_trait]
impl Component for IxiaTgSpec {
    fn kind(&self) -> ComponentKind {
        ComponentKind::IxiaTg
    }

    fn set_cluster_client(&mut self, client: Arc<dyn ClusterClient>) {
        self.handles.set_cluster(client);
    }

    #[instrument(skip_all)]
    async fn deploy(&mut self, _ctx: &Context) -> Result<()> {
        apply_operator(&self.handles, &self.config.operator).await?;
        self.apply_config_map().await?;
        self.handles.mark_deployed();
        Ok(())
    }

    #[instrument(skip_all)]
    async fn healthy(&mut self, ctx: &Context) -> Result<()> {
        wait_operator(ctx, &self.handles, TARGET).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_manifest() {
        let release = IxiaTgConfigMap {
            release: "from-arg".to_string(),
            images: vec![IxiaTgImage {
                name: "controller".to_string(),
                path: "some/path".to_string(),
                tag: "latest".to_string(),
            }],
        };
        let manifest = release.to_manifest().unwrap();
        let config_map: ConfigMap = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(config_map.metadata.name.as_deref(), Some(RELEASE_CONFIG_MAP));
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("ixiatg-op-system"));

        let data = config_map.data.unwrap();
        let versions = &data[RELEASE_KEY];
        let parsed: IxiaTgConfigMap = serde_json::from_str(versions).unwrap();
        assert_eq!(parsed, release);
    }

    #[test]
    fn test_rendered_manifest_removed_on_drop() {
        let file = write_manifest("kind: ConfigMap\n").unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kind: ConfigMap\n");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("yaml"));
        drop(file);
        assert!(!path.exists());
    }
}
