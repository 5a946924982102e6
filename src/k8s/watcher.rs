//! Readiness watcher
//!
//! Blocks until a watched object satisfies a readiness predicate, the watch
//! fails, or the caller's [`Context`] is cancelled. A listener task forwards
//! the watch stream into a bounded channel; it is stopped, and the watch
//! dropped, on every exit path of the wait.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::WatchEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{ClusterClient, WatchStream};
use crate::context::Context;
use crate::error::{Error, Result};

/// What is being waited on, for logs and errors
#[derive(Debug, Clone, Copy)]
pub struct WatchTarget<'a> {
    pub kind: &'static str,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl WatchTarget<'_> {
    fn failure(&self, reason: impl Into<String>) -> Error {
        Error::Watch {
            kind: self.kind,
            namespace: self.namespace.to_string(),
            name: self.name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Ready once no replica is unavailable and every desired replica is ready.
/// Desired replicas default to 1 when the spec leaves them unset.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    match &deployment.status {
        Some(status) => {
            status.unavailable_replicas.unwrap_or(0) == 0
                && status.ready_replicas.unwrap_or(0) == desired
        }
        None => false,
    }
}

/// Ready once no pod is unavailable and every scheduled pod is ready
pub fn daemon_set_ready(daemon_set: &DaemonSet) -> bool {
    match &daemon_set.status {
        Some(status) => {
            status.number_unavailable.unwrap_or(0) == 0
                && status.number_ready == status.desired_number_scheduled
        }
        None => false,
    }
}

/// Wait for the named deployment to become ready
pub async fn wait_for_deployment(
    ctx: &Context,
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let target = WatchTarget {
        kind: "Deployment",
        namespace,
        name,
    };
    if let Some(reason) = ctx.err() {
        return Err(reason.into());
    }
    let stream = client
        .watch_deployments(namespace, name)
        .await
        .map_err(|e| target.failure(e.to_string()))?;
    wait_ready(ctx, target, stream, deployment_ready).await
}

/// Wait for the named daemon set to become ready
pub async fn wait_for_daemon_set(
    ctx: &Context,
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let target = WatchTarget {
        kind: "DaemonSet",
        namespace,
        name,
    };
    if let Some(reason) = ctx.err() {
        return Err(reason.into());
    }
    let stream = client
        .watch_daemon_sets(namespace, name)
        .await
        .map_err(|e| target.failure(e.to_string()))?;
    wait_ready(ctx, target, stream, daemon_set_ready).await
}

/// Consume `stream` until `ready` holds for an added or modified object.
///
/// Cancellation is checked before every event, so a context that is already
/// done wins over events that are already buffered.
#[instrument(skip_all, fields(kind = target.kind, namespace = target.namespace, name = target.name))]
pub async fn wait_ready<K, P>(
    ctx: &Context,
    target: WatchTarget<'_>,
    stream: WatchStream<K>,
    ready: P,
) -> Result<()>
where
    K: Send + 'static,
    P: Fn(&K) -> bool,
{
    let (tx, mut rx) = mpsc::channel(1);
    let stop = CancellationToken::new();
    let _stop_on_exit = stop.clone().drop_guard();
    tokio::spawn(forward(stream, tx, stop));

    loop {
        let event = tokio::select! {
            biased;
            reason = ctx.done() => {
                info!(%reason, "Stopped waiting for readiness");
                return Err(reason.into());
            }
            event = rx.recv() => event,
        };

        match event {
            Some(Ok(WatchEvent::Added(obj))) | Some(Ok(WatchEvent::Modified(obj))) => {
                if ready(&obj) {
                    info!("Ready");
                    return Ok(());
                }
                debug!("Not ready yet");
            }
            Some(Ok(WatchEvent::Deleted(_))) => {
                warn!("Object deleted while waiting for readiness");
            }
            Some(Ok(WatchEvent::Bookmark(_))) => {}
            Some(Ok(WatchEvent::Error(e))) => {
                return Err(target.failure(format!("watch error: {}", e.message)));
            }
            Some(Err(e)) => return Err(target.failure(e.to_string())),
            None => return Err(target.failure("watch closed before ready")),
        }
    }
}

/// Listener half: pump events until the source ends, the consumer goes away,
/// or `stop` fires. Dropping `stream` on return releases the watch.
async fn forward<K>(
    mut stream: WatchStream<K>,
    tx: mpsc::Sender<std::result::Result<WatchEvent<K>, kube::Error>>,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(event) = next else { break };
        tokio::select! {
            _ = stop.cancelled() => break,
            sent = tx.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}
