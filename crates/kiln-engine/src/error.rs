use thiserror::Error;

/// Structural errors that abort a run before any job is dispatched.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Cycle(#[from] kiln_graph::CycleError),

  #[error("job '{job}' depends on undeclared job '{dep}'")]
  UnknownDependency { job: String, dep: String },

  #[error(transparent)]
  Executor(#[from] kiln_executor::ExecutorError),
}
