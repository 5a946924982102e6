//! Error type shared by every component

use std::path::PathBuf;

use thiserror::Error;

use crate::context::Cancelled;
use crate::exec::ExecError;
use crate::network::{NetworkError, PoolError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required tool is not on `PATH`; raised before any command runs
    #[error("install dependency {0:?} to deploy")]
    MissingDependency(String),

    /// A command in a multi-step sequence failed
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ExecError,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed to ensure namespace {name}: {source}")]
    Namespace {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to get secret {namespace}/{name}: {source}")]
    SecretGet {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("secret error: failed to create {namespace}/{name}: {source}")]
    SecretCreate {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to write config map {namespace}/{name}: {source}")]
    ConfigMap {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to list container networks: {0}")]
    NetworkList(#[source] NetworkError),

    #[error("container network {0:?} not found")]
    NetworkNotFound(String),

    #[error("container network {0:?} has no IPv4 subnet")]
    NoIpv4Subnet(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{component} configmap not found at {}: {source}", path.display())]
    ConfigNotFound {
        component: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render {what}: {message}")]
    Render { what: &'static str, message: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch {kind} {namespace}/{name}: {reason}")]
    Watch {
        kind: &'static str,
        namespace: String,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("cluster client not set for {0}")]
    NoClusterClient(&'static str),

    #[error("{0} has not been deployed")]
    NotDeployed(&'static str),

    #[error("failed to connect to cluster: {0}")]
    Connect(String),

    #[error("invalid deployment file {}: {message}", path.display())]
    DeploymentFile { path: PathBuf, message: String },
}

impl Error {
    /// Wrap a command failure with the step it belongs to
    pub fn step(step: &'static str) -> impl FnOnce(ExecError) -> Error {
        move |source| Error::Step { step, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_message_leads() {
        let err = Error::step("failed to pull")(ExecError::Failed {
            command: "docker pull alpine".to_string(),
            code: Some(1),
            stderr: "denied".to_string(),
        });
        assert!(err.to_string().starts_with("failed to pull: "));
        assert!(err.to_string().ends_with("denied"));
    }

    #[test]
    fn test_missing_dependency_message() {
        let err = Error::MissingDependency("kind".to_string());
        assert_eq!(err.to_string(), r#"install dependency "kind" to deploy"#);
    }

    #[test]
    fn test_cancelled_is_distinct() {
        let err = Error::from(Cancelled::Canceled);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "context canceled");

        let err = Error::Watch {
            kind: "Deployment",
            namespace: "ns".to_string(),
            name: "d".to_string(),
            reason: "stream closed".to_string(),
        };
        assert!(!err.is_cancelled());
    }
}
