//! Network emulation cluster deployer
//!
//! Brings up a `kind` cluster and the infrastructure a network emulation
//! topology runs on: MetalLB for service addresses, meshnet for point to
//! point links, and the vendor operators that manage network elements.

pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod k8s;
pub mod network;

pub use context::Context;
pub use deploy::{Component, Deployment, DeploymentFile};
pub use error::{Error, Result};
pub use exec::Tools;
