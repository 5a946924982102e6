use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{command_line, ExecError, Execer, Host};

/// Executes commands as child processes of the deployer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecer;

impl SystemExecer {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
    ) -> Result<String, ExecError> {
        let command = command_line(program, args);
        debug!(command = %command, "Running command");
        let spawn_failed = |e: std::io::Error| ExecError::Spawn {
            command: command.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_failed)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(spawn_failed)?;
            // Closing stdin lets the child see EOF
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(spawn_failed)?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            if !stderr.is_empty() {
                debug!(command = %command, stderr = %stderr, "Command wrote to stderr");
            }
            Ok(stdout)
        } else {
            warn!(command = %command, stderr = %stderr, "Command failed");
            Err(ExecError::Failed {
                command,
                code: output.status.code(),
                stderr,
            })
        }
    }
}

#[async_trait]
impl Execer for SystemExecer {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<String, ExecError> {
        self.run(program, args, None).await
    }

    async fn exec_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<String, ExecError> {
        self.run(program, args, Some(input)).await
    }
}

/// Answers path and file lookups from the local machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn look_path(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return path.is_file().then_some(path);
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    fn stat(&self, path: &Path) -> std::io::Result<()> {
        std::fs::metadata(path).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let out = SystemExecer.exec("sh", &["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_exec_reports_exit_status() {
        let err = SystemExecer
            .exec("sh", &["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exec_with_input_feeds_stdin() {
        let out = SystemExecer
            .exec_with_input("sh", &["-c", "cat"], "secret")
            .await
            .unwrap();
        assert_eq!(out, "secret");
    }

    #[tokio::test]
    async fn test_exec_missing_program() {
        let err = SystemExecer
            .exec("definitely-not-a-real-program-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_look_path() {
        assert!(SystemHost.look_path("sh").is_some());
        assert!(SystemHost.look_path("definitely-not-a-real-program-xyz").is_none());
    }

    #[test]
    fn test_stat() {
        assert!(SystemHost.stat(Path::new("/")).is_ok());
        assert!(SystemHost.stat(Path::new("/no/such/file/here")).is_err());
    }
}
