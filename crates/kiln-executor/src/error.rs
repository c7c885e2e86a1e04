use thiserror::Error;

/// Errors from executor dispatch and execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
  #[error("failed to spawn command: {source}")]
  Spawn {
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("execution cancelled")]
  Cancelled,

  #[error("unknown engine '{name}'")]
  UnknownEngine { name: String },

  #[error("job '{name}' declares no command")]
  MissingCommand { name: String },

  #[error("job '{name}' declares no image, required by the '{engine}' engine")]
  MissingImage { name: String, engine: &'static str },
}
