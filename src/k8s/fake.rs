//! In-memory [`ClusterClient`] with scripted watches and injectable failures

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::WatchEvent;
use kube::core::ErrorResponse;
use tokio::sync::mpsc;

use super::client::{ClusterClient, WatchStream};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    GetNamespace,
    CreateNamespace,
    GetSecret,
    CreateSecret,
    GetConfigMap,
    WriteConfigMap,
    WatchDeployments,
    WatchDaemonSets,
}

struct WatchScript<K> {
    events: Vec<WatchEvent<K>>,
    close: bool,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    failures: HashMap<FakeOp, String>,
    deployment_watches: HashMap<Key, WatchScript<Deployment>>,
    daemon_set_watches: HashMap<Key, WatchScript<DaemonSet>>,
}

/// Cluster double for component tests.
///
/// A scripted watch delivers its events one at a time through a channel of
/// capacity one from a separate task, so the consumer observes them
/// asynchronously the way a real watch would. Unless scripted to close, the
/// watch then stays open until the consumer drops it. Watches that were never
/// scripted stay open and silent.
#[derive(Clone, Default)]
pub struct FakeClusterClient {
    state: Arc<Mutex<State>>,
    watches_opened: Arc<AtomicUsize>,
    watches_released: Arc<AtomicUsize>,
}

pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: FakeOp) -> Result<(), kube::Error> {
        match self.state().failures.get(&op) {
            Some(message) => Err(api_error(500, "InternalError", message)),
            None => Ok(()),
        }
    }

    /// Make every call of `op` fail with `message`
    pub fn fail(self, op: FakeOp, message: &str) -> Self {
        self.state().failures.insert(op, message.to_string());
        self
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state().namespaces.insert(name.to_string());
        self
    }

    pub fn with_secret(self, namespace: &str, name: &str) -> Self {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), secret);
        self
    }

    pub fn with_config_map(self, namespace: &str, config_map: ConfigMap) -> Self {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.state()
            .config_maps
            .insert((namespace.to_string(), name), config_map);
        self
    }

    pub fn with_deployment_events(
        self,
        namespace: &str,
        name: &str,
        events: Vec<WatchEvent<Deployment>>,
    ) -> Self {
        self.script_deployment(namespace, name, events, false)
    }

    /// Like [`Self::with_deployment_events`] but the watch closes afterwards
    pub fn with_closing_deployment_watch(
        self,
        namespace: &str,
        name: &str,
        events: Vec<WatchEvent<Deployment>>,
    ) -> Self {
        self.script_deployment(namespace, name, events, true)
    }

    fn script_deployment(
        self,
        namespace: &str,
        name: &str,
        events: Vec<WatchEvent<Deployment>>,
        close: bool,
    ) -> Self {
        self.state().deployment_watches.insert(
            (namespace.to_string(), name.to_string()),
            WatchScript { events, close },
        );
        self
    }

    pub fn with_daemon_set_events(
        self,
        namespace: &str,
        name: &str,
        events: Vec<WatchEvent<DaemonSet>>,
    ) -> Self {
        self.state().daemon_set_watches.insert(
            (namespace.to_string(), name.to_string()),
            WatchScript {
                events,
                close: false,
            },
        );
        self
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn watches_opened(&self) -> usize {
        self.watches_opened.load(Ordering::SeqCst)
    }

    /// Watches whose consumer has gone away
    pub fn watches_released(&self) -> usize {
        self.watches_released.load(Ordering::SeqCst)
    }

    fn open_watch<K: Send + 'static>(&self, script: Option<WatchScript<K>>) -> WatchStream<K> {
        self.watches_opened.fetch_add(1, Ordering::SeqCst);
        let WatchScript { events, close } = script.unwrap_or(WatchScript {
            events: Vec::new(),
            close: false,
        });

        let (tx, rx) = mpsc::channel(1);
        let released = self.watches_released.clone();
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    released.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            if !close {
                tx.closed().await;
                released.fetch_add(1, Ordering::SeqCst);
            }
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        self.check(FakeOp::GetNamespace)?;
        Ok(self.state().namespaces.get(name).map(|name| {
            let mut namespace = Namespace::default();
            namespace.metadata.name = Some(name.clone());
            namespace
        }))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, kube::Error> {
        self.check(FakeOp::CreateNamespace)?;
        let name = namespace.metadata.name.clone().unwrap_or_default();
        if !self.state().namespaces.insert(name.clone()) {
            return Err(api_error(409, "AlreadyExists", &format!("namespace {name} exists")));
        }
        Ok(namespace.clone())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, kube::Error> {
        self.check(FakeOp::GetSecret)?;
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        self.check(FakeOp::CreateSecret)?;
        let key = (
            namespace.to_string(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        let mut state = self.state();
        if state.secrets.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "secret exists"));
        }
        state.secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, kube::Error> {
        self.check(FakeOp::GetConfigMap)?;
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.check(FakeOp::WriteConfigMap)?;
        let key = (
            namespace.to_string(),
            config_map.metadata.name.clone().unwrap_or_default(),
        );
        let mut state = self.state();
        if state.config_maps.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "config map exists"));
        }
        state.config_maps.insert(key, config_map.clone());
        Ok(config_map.clone())
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.check(FakeOp::WriteConfigMap)?;
        let key = (
            namespace.to_string(),
            config_map.metadata.name.clone().unwrap_or_default(),
        );
        let mut state = self.state();
        if !state.config_maps.contains_key(&key) {
            return Err(api_error(404, "NotFound", "config map not found"));
        }
        state.config_maps.insert(key, config_map.clone());
        Ok(config_map.clone())
    }

    async fn watch_deployments(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<Deployment>, kube::Error> {
        self.check(FakeOp::WatchDeployments)?;
        let script = self
            .state()
            .deployment_watches
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(self.open_watch(script))
    }

    async fn watch_daemon_sets(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<DaemonSet>, kube::Error> {
        self.check(FakeOp::WatchDaemonSets)?;
        let script = self
            .state()
            .daemon_set_watches
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(self.open_watch(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_secret_round_trip() {
        let client = FakeClusterClient::new();
        assert!(client.get_secret("ns", "s").await.unwrap().is_none());

        let mut secret = Secret::default();
        secret.metadata.name = Some("s".to_string());
        client.create_secret("ns", &secret).await.unwrap();
        assert!(client.get_secret("ns", "s").await.unwrap().is_some());
        assert!(client.create_secret("ns", &secret).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let client = FakeClusterClient::new().fail(FakeOp::GetSecret, "get secret error");
        let err = client.get_secret("ns", "s").await.unwrap_err();
        assert!(err.to_string().contains("get secret error"));
    }

    #[tokio::test]
    async fn test_scripted_watch_delivers_in_order() {
        let mut first = Deployment::default();
        first.metadata.name = Some("one".to_string());
        let mut second = Deployment::default();
        second.metadata.name = Some("two".to_string());

        let client = FakeClusterClient::new().with_closing_deployment_watch(
            "ns",
            "d",
            vec![WatchEvent::Added(first), WatchEvent::Modified(second)],
        );
        let names: Vec<String> = client
            .watch_deployments("ns", "d")
            .await
            .unwrap()
            .map(|event| match event.unwrap() {
                WatchEvent::Added(d) | WatchEvent::Modified(d) => d.metadata.name.unwrap(),
                _ => String::new(),
            })
            .collect()
            .await;
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(client.watches_opened(), 1);
    }
}
