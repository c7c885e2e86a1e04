use thiserror::Error;

/// Backend I/O failures.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  ObjectStore(#[from] object_store::Error),

  #[error("invalid cache configuration: {message}")]
  InvalidConfig { message: String },
}
