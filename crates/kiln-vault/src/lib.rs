//! Vault secret backend.
//!
//! Loads named secrets from a Vault KV v2 mount. Secrets are stored per
//! workspace: `<addr>/v1/<mount>/data/<workspace>` holds a map of secret
//! names to values. Names not present in the store resolve to empty strings
//! so that configurations degrade the same way unset process environment
//! variables do.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
  #[error("vault address is not set")]
  MissingAddr,

  #[error("vault token is not set")]
  MissingToken,

  #[error("vault request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("vault returned status {status} for {path}")]
  Status { status: u16, path: String },
}

/// Vault connection settings, decoded from the configuration's
/// `vault { addr, token, path }` block.
#[derive(Debug, Clone, Default)]
pub struct Vault {
  pub addr: String,
  pub token: String,
  /// KV v2 mount point; defaults to `secret`.
  pub mount: String,
}

/// Response envelope of a KV v2 read.
#[derive(Debug, Deserialize)]
struct SecretResponse {
  data: SecretData,
}

#[derive(Debug, Deserialize)]
struct SecretData {
  data: BTreeMap<String, String>,
}

impl Vault {
  pub fn new(addr: String, token: String, mount: Option<String>) -> Self {
    Self {
      addr,
      token,
      mount: mount.unwrap_or_else(|| "secret".to_string()),
    }
  }

  /// Whether a token is configured. Without one the caller falls back to
  /// the process environment.
  pub fn has_token(&self) -> bool {
    !self.token.is_empty()
  }

  /// Validate the connection settings.
  pub fn init(&self) -> Result<(), VaultError> {
    if self.addr.is_empty() {
      return Err(VaultError::MissingAddr);
    }
    if self.token.is_empty() {
      return Err(VaultError::MissingToken);
    }
    Ok(())
  }

  /// Load `names` from the workspace's secret store. Missing names map to
  /// empty strings.
  pub async fn load_secrets(
    &self,
    workspace: &str,
    names: &[String],
  ) -> Result<BTreeMap<String, String>, VaultError> {
    let path = format!(
      "{}/v1/{}/data/{}",
      self.addr.trim_end_matches('/'),
      self.mount,
      workspace
    );

    tracing::debug!(path = %path, count = names.len(), "loading secrets from vault");

    let response = reqwest::Client::new()
      .get(&path)
      .header("X-Vault-Token", &self.token)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(VaultError::Status {
        status: status.as_u16(),
        path,
      });
    }

    let secrets: SecretResponse = response.json().await?;
    Ok(select_names(&secrets.data.data, names))
  }
}

/// The requested subset of a secret map; names absent from the store map to
/// empty strings.
fn select_names(
  stored: &BTreeMap<String, String>,
  names: &[String],
) -> BTreeMap<String, String> {
  names
    .iter()
    .map(|name| {
      let value = stored.get(name).cloned().unwrap_or_default();
      (name.clone(), value)
    })
    .collect()
}
