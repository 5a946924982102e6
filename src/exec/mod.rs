//! External process execution
//!
//! Every component drives its tooling (`kind`, `kubectl`, `docker`, `gcloud`)
//! through the [`Execer`] trait so a test can script the exact sequence of
//! results a deployment sees. Path lookups and file checks go through [`Host`].

mod fake;
mod system;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use fake::{FakeExecer, FakeHost};
pub use system::{SystemExecer, SystemHost};

/// Failure of a single external invocation
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("{command} exited with {}: {stderr}", exit_code_display(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}

/// Runs one external command and returns its stdout
#[async_trait]
pub trait Execer: Send + Sync {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<String, ExecError>;

    /// Like [`Execer::exec`], with `input` fed to the child's stdin. Secrets
    /// travel this way so they never show up in a command line.
    async fn exec_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<String, ExecError>;
}

/// Lookups against the machine the deployer runs on
pub trait Host: Send + Sync {
    /// Resolve a program name against `PATH`
    fn look_path(&self, program: &str) -> Option<PathBuf>;

    /// Check that a file exists and is readable
    fn stat(&self, path: &Path) -> std::io::Result<()>;
}

/// Process-level handles injected into every component at construction
#[derive(Clone)]
pub struct Tools {
    pub execer: Arc<dyn Execer>,
    pub host: Arc<dyn Host>,
}

impl Tools {
    pub fn new(execer: Arc<dyn Execer>, host: Arc<dyn Host>) -> Self {
        Self { execer, host }
    }

    /// Tools backed by real processes and the real filesystem
    pub fn system() -> Self {
        Self::new(Arc::new(SystemExecer), Arc::new(SystemHost))
    }
}

/// Render a command line for logs and error messages
pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
