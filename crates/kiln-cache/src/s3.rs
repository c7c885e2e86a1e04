use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use crate::{Artifact, Blob, Cache, CacheError};

/// S3-compatible object store settings.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
  pub access_key: String,
  pub secret_key: String,
  pub bucket: String,
  pub endpoint: String,
  pub region: String,
}

/// Object-store-backed cache for S3-compatible endpoints.
///
/// Objects are keyed `{fingerprint}/{output path}`; bodies are streamed
/// through the underlying client.
pub struct S3Cache {
  store: AmazonS3,
}

impl S3Cache {
  pub fn new(config: &S3Config) -> Result<Self, CacheError> {
    let store = AmazonS3Builder::new()
      .with_access_key_id(&config.access_key)
      .with_secret_access_key(&config.secret_key)
      .with_bucket_name(&config.bucket)
      .with_endpoint(&config.endpoint)
      .with_region(&config.region)
      .with_allow_http(true)
      .build()
      .map_err(|err| CacheError::InvalidConfig {
        message: err.to_string(),
      })?;

    Ok(Self { store })
  }

  fn object_path(fingerprint: &str, output: &str) -> ObjectPath {
    ObjectPath::from(format!("{fingerprint}/{output}"))
  }
}

#[async_trait]
impl Cache for S3Cache {
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
      match self.store.get(&Self::object_path(fingerprint, output)).await {
        Ok(result) => blobs.push(Blob {
          path: output.clone(),
          bytes: result.bytes().await?,
        }),
        Err(object_store::Error::NotFound { .. }) => return Ok(None),
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
      let bytes = tokio::fs::read(workspace.join(output)).await?;
      self
        .store
        .put(
          &Self::object_path(fingerprint, output),
          PutPayload::from(Bytes::from(bytes)),
        )
        .await?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_object_path_layout() {
    let path = S3Cache::object_path("abc123", "bin/app");
    assert_eq!(path.as_ref(), "abc123/bin/app");
  }

  #[test]
  fn test_builder_rejects_incomplete_config() {
    // No bucket configured.
    let config = S3Config {
      access_key: "ak".to_string(),
      secret_key: "sk".to_string(),
      endpoint: "http://localhost:9000".to_string(),
      region: "us-east-1".to_string(),
      ..S3Config::default()
    };
    assert!(matches!(
      S3Cache::new(&config),
      Err(CacheError::InvalidConfig { .. })
    ));
  }

  #[test]
  fn test_builder_accepts_complete_config() {
    let config = S3Config {
      access_key: "ak".to_string(),
      secret_key: "sk".to_string(),
      bucket: "artifacts".to_string(),
      endpoint: "http://localhost:9000".to_string(),
      region: "us-east-1".to_string(),
    };
    assert!(S3Cache::new(&config).is_ok());
  }
}
