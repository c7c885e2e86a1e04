//! Job executors.
//!
//! An [`Executor`] runs a job's command with the assembled environment,
//! making the workspace visible and streaming output to the provided sinks.
//! Implementations are looked up by name through the [`ExecutorRegistry`];
//! selection is per-job `engine` first, then the configuration default, then
//! `local`.

mod auth;
mod docker;
mod error;
mod kubernetes;
mod local;
mod process;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use kiln_job::Job;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

pub use auth::{RegistryAuth, DEFAULT_REGISTRY};
pub use docker::DockerExecutor;
pub use error::ExecutorError;
pub use kubernetes::KubernetesExecutor;
pub use local::LocalExecutor;

/// Output targets for a job's stdout and stderr streams.
pub struct OutputSinks {
  pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
  pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl OutputSinks {
  /// Stream to the parent process's stdout/stderr.
  pub fn inherit() -> Self {
    Self {
      stdout: Box::new(tokio::io::stdout()),
      stderr: Box::new(tokio::io::stderr()),
    }
  }

  /// Discard all output.
  pub fn discard() -> Self {
    Self {
      stdout: Box::new(tokio::io::sink()),
      stderr: Box::new(tokio::io::sink()),
    }
  }
}

/// Backend that actually runs a job's command.
#[async_trait]
pub trait Executor: Send + Sync {
  /// The registry name of this executor.
  fn name(&self) -> &'static str;

  /// Run the job to completion and return its exit status. Cancellation is
  /// forwarded: on cancel the spawned work is terminated and
  /// [`ExecutorError::Cancelled`] returned.
  async fn run(
    &self,
    job: &Job,
    workspace: &Path,
    env: &IndexMap<String, String>,
    sinks: OutputSinks,
    cancel: &CancellationToken,
  ) -> Result<i32, ExecutorError>;
}

/// Named executor dispatch table.
pub struct ExecutorRegistry {
  executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
  pub fn new() -> Self {
    Self {
      executors: HashMap::new(),
    }
  }

  /// The built-in set: `local`, `docker` (alias `kaniko`), `kubernetes`.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    registry.register("local", Arc::new(LocalExecutor::new()));

    let docker = Arc::new(DockerExecutor::new());
    registry.register("docker", docker.clone());
    registry.register("kaniko", docker);

    registry.register("kubernetes", Arc::new(KubernetesExecutor::new(None)));
    registry
  }

  pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn Executor>) {
    self.executors.insert(name.into(), executor);
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
    self
      .executors
      .get(name)
      .cloned()
      .ok_or_else(|| ExecutorError::UnknownEngine {
        name: name.to_string(),
      })
  }

  /// Resolve the executor for a job: its own `engine`, the configuration
  /// default, or `local`.
  pub fn select(
    &self,
    job: &Job,
    default_engine: Option<&str>,
  ) -> Result<Arc<dyn Executor>, ExecutorError> {
    let name = job
      .engine
      .as_deref()
      .or(default_engine)
      .unwrap_or("local");
    self.get(name)
  }
}

impl Default for ExecutorRegistry {
  fn default() -> Self {
    Self::builtin()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn job_with_engine(engine: Option<&str>) -> Job {
    Job {
      name: "test".to_string(),
      shell: Some("true".to_string()),
      engine: engine.map(str::to_string),
      ..Job::default()
    }
  }

  #[test]
  fn test_builtin_names_resolve() {
    let registry = ExecutorRegistry::builtin();
    for name in ["local", "docker", "kaniko", "kubernetes"] {
      assert!(registry.get(name).is_ok(), "missing builtin '{name}'");
    }
  }

  #[test]
  fn test_unknown_engine_is_an_error() {
    let registry = ExecutorRegistry::builtin();
    assert!(matches!(
      registry.get("fleet"),
      Err(ExecutorError::UnknownEngine { .. })
    ));
  }

  #[test]
  fn test_selection_precedence() {
    let registry = ExecutorRegistry::builtin();

    let per_job = registry
      .select(&job_with_engine(Some("docker")), Some("kubernetes"))
      .unwrap();
    assert_eq!(per_job.name(), "docker");

    let config_default = registry
      .select(&job_with_engine(None), Some("kubernetes"))
      .unwrap();
    assert_eq!(config_default.name(), "kubernetes");

    let fallback = registry.select(&job_with_engine(None), None).unwrap();
    assert_eq!(fallback.name(), "local");
  }
}
