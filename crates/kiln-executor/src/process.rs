//! Shared child-process plumbing for the process-spawning executors.

use std::process::Stdio;

use tokio::io;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::OutputSinks;

/// Spawn the command, stream its output into the sinks and wait for exit.
/// On cancellation the child is killed and awaited before returning.
pub(crate) async fn run_streaming(
  mut command: Command,
  mut sinks: OutputSinks,
  cancel: &CancellationToken,
) -> Result<i32, ExecutorError> {
  command
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let mut child = command.spawn().map_err(|source| ExecutorError::Spawn { source })?;

  let outcome = tokio::select! {
    status = drive(&mut child, &mut sinks) => Some(status),
    _ = cancel.cancelled() => None,
  };

  match outcome {
    Some(status) => {
      let status = status?;
      Ok(status.code().unwrap_or(-1))
    }
    None => {
      if let Err(err) = child.start_kill() {
        tracing::warn!(error = %err, "failed to kill cancelled child");
      }
      let _ = child.wait().await;
      Err(ExecutorError::Cancelled)
    }
  }
}

async fn drive(
  child: &mut Child,
  sinks: &mut OutputSinks,
) -> io::Result<std::process::ExitStatus> {
  let mut stdout = child.stdout.take();
  let mut stderr = child.stderr.take();

  let stdout_copy = async {
    match stdout.as_mut() {
      Some(stream) => io::copy(stream, &mut sinks.stdout).await.map(|_| ()),
      None => Ok(()),
    }
  };
  let stderr_copy = async {
    match stderr.as_mut() {
      Some(stream) => io::copy(stream, &mut sinks.stderr).await.map(|_| ()),
      None => Ok(()),
    }
  };

  let (out, err, status) = tokio::join!(stdout_copy, stderr_copy, child.wait());
  out?;
  err?;
  status
}
