use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_job::{Command as JobCommand, Job};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::auth::RegistryAuth;
use crate::error::ExecutorError;
use crate::process::run_streaming;
use crate::{Executor, OutputSinks};

/// Runs the job inside a container via the docker CLI. The workspace is
/// bind-mounted at `/workspace` and used as the working directory.
pub struct DockerExecutor {
  auth: Option<RegistryAuth>,
}

impl DockerExecutor {
  pub fn new() -> Self {
    Self {
      auth: RegistryAuth::from_env(),
    }
  }

  pub fn with_auth(auth: RegistryAuth) -> Self {
    Self { auth: Some(auth) }
  }
}

impl Default for DockerExecutor {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Executor for DockerExecutor {
  fn name(&self) -> &'static str {
    "docker"
  }

  async fn run(
    &self,
    job: &Job,
    workspace: &Path,
    env: &IndexMap<String, String>,
    sinks: OutputSinks,
    cancel: &CancellationToken,
  ) -> Result<i32, ExecutorError> {
    if job.image.is_empty() {
      return Err(ExecutorError::MissingImage {
        name: job.name.clone(),
        engine: self.name(),
      });
    }

    let mut command = Command::new("docker");

    // The config dir must outlive the child process.
    let _config_dir = match &self.auth {
      Some(auth) => {
        let dir = tempfile::tempdir()?;
        auth.write_config(dir.path())?;
        command.arg("--config").arg(dir.path());
        Some(dir)
      }
      None => None,
    };

    let mount = format!("{}:/workspace", workspace.canonicalize()?.display());
    command
      .args(["run", "--rm"])
      .args(["-v", &mount])
      .args(["-w", "/workspace"]);

    for (key, value) in env {
      command.arg("-e").arg(format!("{key}={value}"));
    }

    command.arg(&job.image);

    match job.command() {
      Some(JobCommand::Shell(shell)) => {
        command.args(["sh", "-c", shell]);
      }
      Some(JobCommand::Exec(argv)) => {
        command.args(argv);
      }
      None => {
        return Err(ExecutorError::MissingCommand {
          name: job.name.clone(),
        });
      }
    }

    tracing::debug!(job = %job.name, image = %job.image, "dispatching to docker executor");
    run_streaming(command, sinks, cancel).await
  }
}
