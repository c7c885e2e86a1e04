use thiserror::Error;

/// Errors raised by job validation.
#[derive(Debug, Error)]
pub enum JobError {
  /// A job block has an empty label.
  #[error("job name must not be empty")]
  EmptyName,

  /// Neither `shell` nor `exec` is set.
  #[error("job '{name}' declares no command: set either 'shell' or 'exec'")]
  MissingCommand { name: String },

  /// Both `shell` and `exec` are set.
  #[error("job '{name}' declares both 'shell' and 'exec': set exactly one")]
  ConflictingCommand { name: String },

  /// An output path also appears in the job's own inputs.
  #[error("job '{name}' lists '{path}' as both an input and an output")]
  OverlappingPath { name: String, path: String },
}
