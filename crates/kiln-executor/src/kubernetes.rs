use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_job::{Command as JobCommand, Job};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::process::run_streaming;
use crate::{Executor, OutputSinks};

/// Runs the job as a Kubernetes pod via `kubectl run --attach --rm`, which
/// streams the container output and propagates its exit status.
///
/// The workspace is not mounted into the pod; inputs must reach the
/// container through its image or the cache.
pub struct KubernetesExecutor {
  namespace: Option<String>,
}

impl KubernetesExecutor {
  pub fn new(namespace: Option<String>) -> Self {
    Self { namespace }
  }

  fn pod_name(job: &Job) -> String {
    let slug: String = job
      .name
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() {
          c.to_ascii_lowercase()
        } else {
          '-'
        }
      })
      .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("kiln-{}-{}", slug, &suffix[..8])
  }
}

#[async_trait]
impl Executor for KubernetesExecutor {
  fn name(&self) -> &'static str {
    "kubernetes"
  }

  async fn run(
    &self,
    job: &Job,
    _workspace: &Path,
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

    let mut command = Command::new("kubectl");
    command.args([
      "run",
      &Self::pod_name(job),
      "--attach",
      "--rm",
      "--quiet",
      "--restart=Never",
    ]);
    command.arg(format!("--image={}", job.image));

    if let Some(namespace) = &self.namespace {
      command.arg("--namespace").arg(namespace);
    }

    for (key, value) in env {
      command.arg(format!("--env={key}={value}"));
    }

    command.arg("--command").arg("--");
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

    tracing::debug!(job = %job.name, image = %job.image, "dispatching to kubernetes executor");
    run_streaming(command, sinks, cancel).await
  }
}
