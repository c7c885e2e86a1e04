//! Docker registry credential assembly.
//!
//! Container-image builders expect a registry config of the shape
//! `{ auths: { "https://<registry>/v1/": { auth: base64(user:pass) } } }`.
//! The `/v1/` URL template matches what dockerd historically accepted; some
//! registries expect `/v2/`.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

pub const DEFAULT_REGISTRY: &str = "index.docker.io";

#[derive(Debug, Serialize)]
struct DockerAuth {
  auth: String,
}

#[derive(Debug, Serialize)]
struct DockerConfig {
  auths: BTreeMap<String, DockerAuth>,
}

/// Registry credentials for image pushes and authenticated pulls.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
  pub user: String,
  pub pass: String,
  pub registry: String,
}

impl RegistryAuth {
  pub fn new(user: String, pass: String, registry: Option<String>) -> Self {
    Self {
      user,
      pass,
      registry: registry.unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
    }
  }

  /// Credentials from `DOCKER_USER`/`DOCKER_PASS`/`DOCKER_REGISTRY`, if the
  /// first two are set.
  pub fn from_env() -> Option<Self> {
    let user = std::env::var("DOCKER_USER").unwrap_or_default();
    let pass = std::env::var("DOCKER_PASS").unwrap_or_default();
    if user.is_empty() || pass.is_empty() {
      return None;
    }
    let registry = std::env::var("DOCKER_REGISTRY").ok().filter(|r| !r.is_empty());
    Some(Self::new(user, pass, registry))
  }

  /// The registry config document as JSON.
  pub fn config_json(&self) -> serde_json::Value {
    let token = STANDARD.encode(format!("{}:{}", self.user, self.pass));
    let mut auths = BTreeMap::new();
    auths.insert(
      format!("https://{}/v1/", self.registry),
      DockerAuth { auth: token },
    );
    serde_json::to_value(DockerConfig { auths }).unwrap_or_default()
  }

  /// Write `config.json` into a docker config directory.
  pub fn write_config(&self, dir: &Path) -> io::Result<()> {
    let rendered = serde_json::to_string(&self.config_json())?;
    std::fs::write(dir.join("config.json"), rendered)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_shape_and_default_registry() {
    let auth = RegistryAuth::new("user".to_string(), "pass".to_string(), None);
    let config = auth.config_json();

    let entry = &config["auths"]["https://index.docker.io/v1/"];
    assert_eq!(entry["auth"], STANDARD.encode("user:pass"));
  }

  #[test]
  fn test_custom_registry_key() {
    let auth = RegistryAuth::new(
      "u".to_string(),
      "p".to_string(),
      Some("registry.example.com".to_string()),
    );
    let config = auth.config_json();
    assert!(config["auths"]
      .as_object()
      .unwrap()
      .contains_key("https://registry.example.com/v1/"));
  }

  #[test]
  fn test_write_config() {
    let dir = tempfile::tempdir().unwrap();
    let auth = RegistryAuth::new("u".to_string(), "p".to_string(), None);
    auth.write_config(dir.path()).unwrap();

    let written = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert!(parsed["auths"]["https://index.docker.io/v1/"]["auth"].is_string());
  }
}
