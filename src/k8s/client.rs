//! Typed access to the cluster objects the deployer reads and writes

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::{
    api::{Api, PostParams, WatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{debug, info, instrument};

use crate::error::Error;

/// Event stream of one watch; dropping it ends the watch
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, kube::Error>>;

/// Cluster operations used by the components.
///
/// Lookups return `Ok(None)` when the object does not exist so callers can
/// tell a missing object apart from a failed request.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, kube::Error>;

    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, kube::Error>;

    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, kube::Error>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    /// Watch the named deployment in `namespace`
    async fn watch_deployments(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<Deployment>, kube::Error>;

    /// Watch the named daemon set in `namespace`
    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<DaemonSet>, kube::Error>;
}

/// [`ClusterClient`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect through a named kubeconfig context, e.g. `kind-<cluster>`
    #[instrument(skip(kubeconfig))]
    pub async fn for_context(context: &str, kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = match kubeconfig {
            Some(path) => {
                let raw = Kubeconfig::read_from(path).map_err(|e| Error::Connect(e.to_string()))?;
                Config::from_custom_kubeconfig(raw, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| Error::Connect(e.to_string()))?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, Error> {
        let client = Client::try_from(config).map_err(|e| Error::Connect(e.to_string()))?;
        info!("Connected to Kubernetes cluster");
        Ok(Self { client })
    }

    fn watch_params(name: &str) -> WatchParams {
        WatchParams::default().fields(&format!("metadata.name={}", name))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name).await
    }

    #[instrument(skip(self, namespace), fields(namespace = %namespace.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let created = api.create(&PostParams::default(), namespace).await?;
        info!("Created namespace");
        Ok(created)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    #[instrument(skip(self, secret), fields(secret = %secret.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), secret).await?;
        info!("Created secret");
        Ok(created)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    #[instrument(skip(self, config_map), fields(config_map = %config_map.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), config_map).await?;
        info!("Created config map");
        Ok(created)
    }

    #[instrument(skip(self, config_map), fields(config_map = %config_map.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let replaced = api
            .replace(
                config_map.metadata.name.as_deref().unwrap_or_default(),
                &PostParams::default(),
                config_map,
            )
            .await?;
        info!("Replaced config map");
        Ok(replaced)
    }

    async fn watch_deployments(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<Deployment>, kube::Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Opening deployment watch");
        Ok(api.watch(&Self::watch_params(name), "0").await?.boxed())
    }

    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<DaemonSet>, kube::Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Opening daemon set watch");
        Ok(api.watch(&Self::watch_params(name), "0").await?.boxed())
    }
}
