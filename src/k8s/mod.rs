//! Kubernetes integration
//!
//! - Typed get/create for namespaces, secrets and config maps
//! - Name-scoped watches on deployments and daemon sets
//! - The readiness watcher built on those watches

mod client;
mod fake;
mod watcher;

pub use client::{ClusterClient, KubeClusterClient, WatchStream};
pub use fake::{api_error, FakeClusterClient, FakeOp};
pub use watcher::{
    daemon_set_ready, deployment_ready, wait_for_daemon_set, wait_for_deployment, wait_ready,
    WatchTarget,
};
