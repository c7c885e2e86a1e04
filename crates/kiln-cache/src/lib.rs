//! Content-addressed artifact cache.
//!
//! A job's [fingerprint](fingerprint()) keys artifacts produced by earlier
//! runs. Backends implement the same [`Cache`] contract: `lookup` is
//! side-effect-free, `store` is at-least-once and idempotent, and `restore`
//! materializes blob bytes at their declared workspace paths.

mod error;
mod fingerprint;
mod fs;
mod s3;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::CacheError;
pub use fingerprint::{fingerprint, FingerprintError};
pub use fs::FsCache;
pub use s3::{S3Cache, S3Config};

/// A stored output: its declared workspace-relative path and its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
  pub path: String,
  pub bytes: Bytes,
}

/// The cached outputs of one job run.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
  pub fingerprint: String,
  pub blobs: Vec<Blob>,
}

/// Cache contract shared by all backends.
#[async_trait]
pub trait Cache: Send + Sync {
  /// Fetch the artifact stored under `fingerprint`, if every declared
  /// output is present. Never mutates the backend.
  async fn lookup(
    &self,
    fingerprint: &str,
    outputs: &[String],
  ) -> Result<Option<Artifact>, CacheError>;

  /// Store the current bytes of each declared output under `fingerprint`.
  /// Overwriting an existing entry is permitted and idempotent; concurrent
  /// writers to the same key are assumed to carry identical bytes.
  async fn store(
    &self,
    fingerprint: &str,
    workspace: &Path,
    outputs: &[String],
  ) -> Result<(), CacheError>;

  /// Materialize a stored artifact's blobs at their declared paths under
  /// `workspace`, creating parent directories as needed.
  async fn restore(&self, artifact: &Artifact, workspace: &Path) -> Result<(), CacheError> {
    for blob in &artifact.blobs {
      let path = workspace.join(&blob.path);
      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      tokio::fs::write(&path, &blob.bytes).await?;
    }
    Ok(())
  }
}
