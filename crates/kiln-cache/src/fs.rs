use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use crate::{Artifact, Blob, Cache, CacheError};

/// Directory-backed cache.
///
/// Artifacts are laid out as `{dir}/{fingerprint}/{output path}`. Parent
/// directories are created on demand.
pub struct FsCache {
  dir: PathBuf,
}

impl FsCache {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn blob_path(&self, fingerprint: &str, output: &str) -> PathBuf {
    self.dir.join(fingerprint).join(output)
  }
}

#[async_trait]
impl Cache for FsCache {
  async fn lookup(
    &self,
    fingerprint: &str,
    outputs: &[String],
  ) -> Result<Option<Artifact>, CacheError> {
    // A hit must vouch for at least one stored output.
    if outputs.is_empty() {
      return Ok(None);
    }

    let mut blobs = Vec::with_capacity(outputs.len());

    for output in outputs {
      match fs::read(self.blob_path(fingerprint, output)).await {
        Ok(bytes) => blobs.push(Blob {
          path: output.clone(),
          bytes: Bytes::from(bytes),
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
      }
    }

    Ok(Some(Artifact {
      fingerprint: fingerprint.to_string(),
      blobs,
    }))
  }

  async fn store(
    &self,
    fingerprint: &str,
    workspace: &Path,
    outputs: &[String],
  ) -> Result<(), CacheError> {
    for output in outputs {
      let bytes = fs::read(workspace.join(output)).await?;
      let path = self.blob_path(fingerprint, output);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
      }
      fs::write(&path, bytes).await?;
    }
    Ok(())
  }
}
