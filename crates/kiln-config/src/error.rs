use thiserror::Error;

/// Errors surfaced while decoding a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// Position-attached parse error from the HCL front end.
  #[error("{0}")]
  Syntax(String),

  /// Expression evaluation failed: unknown symbol, type mismatch or
  /// function arity.
  #[error("{message}")]
  Eval { message: String },

  /// The job reference graph contains a cycle.
  #[error(transparent)]
  Cycle(#[from] kiln_graph::CycleError),

  /// The fixed-point job decode hit its iteration cap.
  #[error("job '{job}' did not resolve within {rounds} rounds: {last}")]
  DepthLimit {
    job: String,
    rounds: usize,
    last: String,
  },

  /// An expression references a job that is not declared.
  #[error("job '{job}' references undefined job '{reference}'")]
  UndefinedJob { job: String, reference: String },

  #[error("duplicate job name '{name}'")]
  DuplicateJob { name: String },

  #[error("job '{job}' has unsupported attribute '{attr}'")]
  UnknownAttribute { job: String, attr: String },

  #[error("job '{job}' has unsupported nested block '{block}'")]
  UnknownBlock { job: String, block: String },

  #[error("attribute '{attr}' in {scope}: expected {expected}")]
  TypeMismatch {
    scope: String,
    attr: String,
    expected: &'static str,
  },

  #[error("missing attribute '{attr}' in {scope}")]
  MissingAttribute { scope: String, attr: String },

  #[error(transparent)]
  Job(#[from] kiln_job::JobError),

  #[error(transparent)]
  Vault(#[from] kiln_vault::VaultError),
}

impl From<hcl::Error> for ConfigError {
  fn from(err: hcl::Error) -> Self {
    ConfigError::Syntax(err.to_string())
  }
}

impl From<hcl::eval::Error> for ConfigError {
  fn from(err: hcl::eval::Error) -> Self {
    ConfigError::Eval {
      message: err.to_string(),
    }
  }
}
