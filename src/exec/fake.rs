//! Scripted stand-ins for [`Execer`] and [`Host`]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{command_line, ExecError, Execer, Host};

/// Replays canned results in order and records every invocation.
///
/// `Ok(stdout)` entries succeed with that output, `Err(message)` entries fail
/// with a non-zero exit carrying the message as stderr. Running past the end
/// of the script is itself a failure, so an unexpected extra command shows up
/// in the test instead of silently succeeding.
#[derive(Debug, Default)]
pub struct FakeExecer {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<Vec<String>>,
}

impl FakeExecer {
    pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
        let responses = responses
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// A script of `count` successful, silent commands
    pub fn succeeding(count: usize) -> Self {
        Self::new(vec![Ok(""); count])
    }

    /// Command lines issued so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Everything written to stdin, one entry per `exec_with_input`
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }

    /// Scripted results not yet consumed
    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl FakeExecer {
    fn respond(&self, program: &str, args: &[&str]) -> Result<String, ExecError> {
        let command = command_line(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        match next {
            Some(Ok(stdout)) => Ok(stdout),
            Some(Err(stderr)) => Err(ExecError::Failed {
                command,
                code: Some(1),
                stderr,
            }),
            None => Err(ExecError::Failed {
                command,
                code: None,
                stderr: "no scripted result left".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Execer for FakeExecer {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<String, ExecError> {
        self.respond(program, args)
    }

    async fn exec_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<String, ExecError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input.to_string());
        }
        self.respond(program, args)
    }
}

/// Host whose programs and files all exist unless marked missing
#[derive(Debug, Default, Clone)]
pub struct FakeHost {
    missing_programs: HashSet<String>,
    files_missing: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_program(mut self, program: &str) -> Self {
        self.missing_programs.insert(program.to_string());
        self
    }

    /// Every `stat` fails with not-found
    pub fn without_files(mut self) -> Self {
        self.files_missing = true;
        self
    }
}

impl Host for FakeHost {
    fn look_path(&self, program: &str) -> Option<PathBuf> {
        if self.missing_programs.contains(program) {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(program))
        }
    }

    fn stat(&self, path: &Path) -> std::io::Result<()> {
        if self.files_missing {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: file not found", path.display()),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_execer_replays_script() {
        let fake = FakeExecer::new(vec![Ok("out"), Err("boom")]);

        assert_eq!(fake.exec("a", &["1"]).await.unwrap(), "out");
        let err = fake.exec("b", &[]).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        let err = fake.exec("c", &[]).await.unwrap_err();
        assert!(err.to_string().contains("no scripted result left"));

        assert_eq!(fake.calls(), vec!["a 1", "b", "c"]);
        assert_eq!(fake.remaining(), 0);
    }

    #[tokio::test]
    async fn test_fake_execer_keeps_input_off_the_command_line() {
        let fake = FakeExecer::succeeding(1);
        fake.exec_with_input("login", &["--stdin"], "hunter2")
            .await
            .unwrap();
        assert_eq!(fake.calls(), vec!["login --stdin"]);
        assert_eq!(fake.inputs(), vec!["hunter2"]);
    }

    #[test]
    fn test_fake_host() {
        let host = FakeHost::new().without_program("kind").without_files();
        assert!(host.look_path("kind").is_none());
        assert!(host.look_path("kubectl").is_some());
        assert!(host.stat(Path::new("/x")).is_err());
        assert!(FakeHost::new().stat(Path::new("/x")).is_ok());
    }
}
