use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{NetworkClient, NetworkError, NetworkResource};
use crate::exec::Execer;

/// Reads network descriptions through the docker CLI
#[derive(Clone)]
pub struct DockerNetworkClient {
    execer: Arc<dyn Execer>,
}

impl DockerNetworkClient {
    pub fn new(execer: Arc<dyn Execer>) -> Self {
        Self { execer }
    }
}

#[async_trait]
impl NetworkClient for DockerNetworkClient {
    async fn list_networks(&self) -> Result<Vec<NetworkResource>, NetworkError> {
        let ids = self.execer.exec("docker", &["network", "ls", "-q"]).await?;
        let ids: Vec<&str> = ids.split_whitespace().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["network", "inspect"];
        args.extend(ids.iter().copied());
        let out = self.execer.exec("docker", &args).await?;
        let networks: Vec<NetworkResource> = serde_json::from_str(&out)?;
        debug!(count = networks.len(), "Listed container networks");
        Ok(networks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FakeExecer;

    const INSPECT: &str = r#"[
        {
            "Name": "kind",
            "Id": "a1b2",
            "IPAM": {
                "Driver": "default",
                "Options": {},
                "Config": [
                    {"Subnet": "172.18.0.0/16", "Gateway": "172.18.0.1"},
                    {"Subnet": "fc00:f853:ccd:e793::/64"}
                ]
            }
        },
        {
            "Name": "bridge",
            "Id": "c3d4",
            "IPAM": {"Driver": "default", "Config": [{"Subnet": "172.17.0.0/16"}]}
        }
    ]"#;

    #[tokio::test]
    async fn test_list_networks() {
        let execer = Arc::new(FakeExecer::new(vec![Ok("a1b2\nc3d4\n"), Ok(INSPECT)]));
        let client = DockerNetworkClient::new(execer.clone());

        let networks = client.list_networks().await.unwrap();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].name, "kind");
        assert_eq!(
            networks[0].ipv4_subnets().collect::<Vec<_>>(),
            vec!["172.18.0.0/16"]
        );
        assert_eq!(
            execer.calls(),
            vec!["docker network ls -q", "docker network inspect a1b2 c3d4"]
        );
    }

    #[tokio::test]
    async fn test_no_networks_skips_inspect() {
        let execer = Arc::new(FakeExecer::new(vec![Ok("")]));
        let client = DockerNetworkClient::new(execer.clone());

        assert!(client.list_networks().await.unwrap().is_empty());
        assert_eq!(execer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_json() {
        let execer = Arc::new(FakeExecer::new(vec![Ok("a1b2"), Ok("not json")]));
        let err = DockerNetworkClient::new(execer)
            .list_networks()
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Decode(_)));
    }
}
