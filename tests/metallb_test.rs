//! Tests for the MetalLB component

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use kube::api::WatchEvent;
use tokio_test::{assert_err, assert_ok};

use netsim_deploy::deploy::{parse_pools, Component, MetalLbConfig, MetalLbSpec};
use netsim_deploy::exec::{FakeExecer, FakeHost, Tools};
use netsim_deploy::k8s::{FakeClusterClient, FakeOp};
use netsim_deploy::network::{NetworkResource, StaticNetworkClient};
use netsim_deploy::{Context, Error};

fn controller(ready: i32, unavailable: i32) -> Deployment {
    let mut deployment = Deployment {
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            unavailable_replicas: Some(unavailable),
            ..Default::default()
        }),
        ..Default::default()
    };
    deployment.metadata.name = Some("controller".to_string());
    deployment.metadata.namespace = Some("metallb-system".to_string());
    deployment
}

fn kind_network() -> StaticNetworkClient {
    StaticNetworkClient::new(vec![
        NetworkResource::new("bridge", &["172.17.0.0/16"]),
        NetworkResource::new("kind", &["fc00:f853:ccd:e793::/64", "172.18.0.0/16"]),
    ])
}

fn metallb(
    execer: &Arc<FakeExecer>,
    client: &FakeClusterClient,
    network: StaticNetworkClient,
) -> MetalLbSpec {
    let config = MetalLbConfig {
        manifest: "/manifests/metallb.yaml".into(),
        ip_count: 20,
        ..Default::default()
    };
    let tools = Tools::new(execer.clone(), Arc::new(FakeHost::new()));
    let mut spec = MetalLbSpec::new(config, tools).with_network_client(Arc::new(network));
    spec.set_cluster_client(Arc::new(client.clone()));
    spec
}

#[tokio::test]
async fn test_valid_deployment() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new().with_deployment_events(
        "metallb-system",
        "controller",
        vec![
            WatchEvent::Added(controller(0, 1)),
            WatchEvent::Modified(controller(1, 0)),
        ],
    );
    let mut spec = metallb(&execer, &client, kind_network());

    assert_ok!(spec.deploy(&Context::background()).await);
    assert_eq!(execer.calls(), vec!["kubectl apply -f /manifests/metallb.yaml"]);
    assert!(client.has_namespace("metallb-system"));
    let secret = client.secret("metallb-system", "memberlist").unwrap();
    assert!(secret.data.unwrap().contains_key("secretkey"));

    assert_ok!(spec.healthy(&Context::background()).await);
    let config_map = client.config_map("metallb-system", "config").unwrap();
    let data = config_map.data.unwrap();
    let pools = parse_pools(&data["config"]).unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].to_string(), "172.18.0.50 - 172.18.0.70");
    assert_eq!(client.watches_opened(), 1);
}

#[tokio::test]
async fn test_existing_namespace_and_secret_are_kept() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new()
        .with_namespace("metallb-system")
        .with_secret("metallb-system", "memberlist");
    let mut spec = metallb(&execer, &client, kind_network());

    assert_ok!(spec.deploy(&Context::background()).await);
    // The pre-existing secret carries no data and must not be overwritten
    assert!(client
        .secret("metallb-system", "memberlist")
        .unwrap()
        .data
        .is_none());
}

#[tokio::test]
async fn test_namespace_error() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new().fail(FakeOp::GetNamespace, "namespace error");
    let mut spec = metallb(&execer, &client, kind_network());

    let err = assert_err!(spec.deploy(&Context::background()).await);
    assert!(err.to_string().contains("namespace error"), "{err}");
    assert!(err.to_string().contains("metallb-system"), "{err}");
    assert!(execer.calls().is_empty());
}

#[tokio::test]
async fn test_secret_get_error() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new().fail(FakeOp::GetSecret, "get secret error");
    let mut spec = metallb(&execer, &client, kind_network());

    let err = assert_err!(spec.deploy(&Context::background()).await);
    assert!(matches!(err, Error::SecretGet { .. }));
    assert!(err.to_string().contains("get secret error"));
}

#[tokio::test]
async fn test_secret_create_error() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new().fail(FakeOp::CreateSecret, "create secret error");
    let mut spec = metallb(&execer, &client, kind_network());

    let err = assert_err!(spec.deploy(&Context::background()).await);
    assert!(err.to_string().starts_with("secret error"), "{err}");
    assert!(execer.calls().is_empty());
}

#[tokio::test]
async fn test_manifest_error_surfaced_verbatim() {
    let execer = Arc::new(FakeExecer::new(vec![Err("metallb error")]));
    let client = FakeClusterClient::new();
    let mut spec = metallb(&execer, &client, kind_network());

    let err = assert_err!(spec.deploy(&Context::background()).await);
    assert!(matches!(err, Error::Exec(_)));
    assert!(err.to_string().ends_with("metallb error"));
}

#[tokio::test]
async fn test_canceled_context() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new();
    let mut spec = metallb(&execer, &client, kind_network());
    assert_ok!(spec.deploy(&Context::background()).await);

    let ctx = Context::background();
    ctx.cancel();
    let err = assert_err!(spec.healthy(&ctx).await);
    assert_eq!(err.to_string(), "context canceled");
}

#[tokio::test]
async fn test_network_list_error() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new();
    let mut spec = metallb(&execer, &client, StaticNetworkClient::failing("dclient error"));
    assert_ok!(spec.deploy(&Context::background()).await);

    let err = assert_err!(spec.healthy(&Context::background()).await);
    assert!(err.to_string().contains("dclient error"), "{err}");
    assert!(client.config_map("metallb-system", "config").is_none());
}

#[tokio::test]
async fn test_network_missing() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let client = FakeClusterClient::new();
    let network = StaticNetworkClient::new(vec![NetworkResource::new("bridge", &["172.17.0.0/16"])]);
    let mut spec = metallb(&execer, &client, network);
    assert_ok!(spec.deploy(&Context::background()).await);

    let err = assert_err!(spec.healthy(&Context::background()).await);
    assert!(matches!(err, Error::NetworkNotFound(_)));
}

#[tokio::test]
async fn test_healthy_requires_deploy() {
    let execer = Arc::new(FakeExecer::default());
    let client = FakeClusterClient::new();
    let mut spec = metallb(&execer, &client, kind_network());

    let err = assert_err!(spec.healthy(&Context::background()).await);
    assert!(matches!(err, Error::NotDeployed(_)));
    assert_eq!(client.watches_opened(), 0);
}

#[tokio::test]
async fn test_deploy_without_cluster_client() {
    let execer = Arc::new(FakeExecer::succeeding(1));
    let tools = Tools::new(execer.clone(), Arc::new(FakeHost::new()));
    let mut spec = MetalLbSpec::new(MetalLbConfig::default(), tools);

    let err = assert_err!(spec.deploy(&Context::background()).await);
    assert!(matches!(err, Error::NoClusterClient(_)));
    assert!(execer.calls().is_empty());
}
