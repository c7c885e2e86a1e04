use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_job::{Command as JobCommand, Job};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::process::run_streaming;
use crate::{Executor, OutputSinks};

/// Runs the job's command directly on the host, with the workspace as the
/// working directory. The job's `image` is ignored.
pub struct LocalExecutor;

impl LocalExecutor {
  pub fn new() -> Self {
    Self
  }
}

impl Default for LocalExecutor {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Executor for LocalExecutor {
  fn name(&self) -> &'static str {
    "local"
  }

  async fn run(
    &self,
    job: &Job,
    workspace: &Path,
    env: &IndexMap<String, String>,
    sinks: OutputSinks,
    cancel: &CancellationToken,
  ) -> Result<i32, ExecutorError> {
    let mut command = match job.command() {
      Some(JobCommand::Shell(shell)) => {
        let mut command = Command::new("sh");
        command.arg("-c").arg(shell);
        command
      }
      Some(JobCommand::Exec(argv)) => {
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command
      }
      None => {
        return Err(ExecutorError::MissingCommand {
          name: job.name.clone(),
        });
      }
    };

    command.current_dir(workspace).envs(env);

    tracing::debug!(job = %job.name, "dispatching to local executor");
    run_streaming(command, sinks, cancel).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::{Duration, Instant};
  use tokio::io::AsyncReadExt;

  fn shell_job(shell: &str) -> Job {
    Job {
      name: "test".to_string(),
      shell: Some(shell.to_string()),
      ..Job::default()
    }
  }

  /// Run a job capturing stdout.
  async fn run_capturing(job: &Job, env: &IndexMap<String, String>) -> (Result<i32, ExecutorError>, String) {
    let workspace = tempfile::tempdir().unwrap();
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let sinks = OutputSinks {
      stdout: Box::new(writer),
      stderr: Box::new(tokio::io::sink()),
    };

    let result = LocalExecutor::new()
      .run(job, workspace.path(), env, sinks, &CancellationToken::new())
      .await;

    let mut captured = String::new();
    reader.read_to_string(&mut captured).await.unwrap();
    (result, captured)
  }

  #[tokio::test]
  async fn test_shell_command_streams_stdout() {
    let (result, output) = run_capturing(&shell_job("printf hello"), &IndexMap::new()).await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "hello");
  }

  #[tokio::test]
  async fn test_exec_command_runs_argv() {
    let job = Job {
      name: "test".to_string(),
      exec: Some(vec!["echo".to_string(), "argv".to_string()]),
      ..Job::default()
    };
    let (result, output) = run_capturing(&job, &IndexMap::new()).await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output.trim(), "argv");
  }

  #[tokio::test]
  async fn test_env_is_passed_through() {
    let mut env = IndexMap::new();
    env.insert("KILN_LOCAL_TEST".to_string(), "value".to_string());

    let (result, output) =
      run_capturing(&shell_job("printf \"$KILN_LOCAL_TEST\""), &env).await;
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "value");
  }

  #[tokio::test]
  async fn test_nonzero_exit_is_reported() {
    let (result, _) = run_capturing(&shell_job("exit 3"), &IndexMap::new()).await;
    assert_eq!(result.unwrap(), 3);
  }

  #[tokio::test]
  async fn test_missing_command_is_an_error() {
    let job = Job {
      name: "test".to_string(),
      ..Job::default()
    };
    let (result, _) = run_capturing(&job, &IndexMap::new()).await;
    assert!(matches!(result, Err(ExecutorError::MissingCommand { .. })));
  }

  #[tokio::test]
  async fn test_cancellation_kills_the_child() {
    let workspace = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let handle = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
      })
    };

    let started = Instant::now();
    let result = LocalExecutor::new()
      .run(
        &shell_job("sleep 30"),
        workspace.path(),
        &IndexMap::new(),
        OutputSinks::discard(),
        &cancel,
      )
      .await;

    assert!(matches!(result, Err(ExecutorError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    handle.await.unwrap();
  }
}
