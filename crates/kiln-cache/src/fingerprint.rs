//! Job fingerprinting.
//!
//! The fingerprint is a SHA-256 over a canonical serialization of the job
//! definition plus the content digests of every input file. Map entries and
//! dependency lists are sorted before hashing, so the result is invariant
//! under attribute reorder in the source document and under env permutation,
//! while any byte change in any input file perturbs it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use kiln_job::{Command, Job};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error(transparent)]
  Io(#[from] io::Error),

  #[error("invalid input pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    source: glob::PatternError,
  },

  #[error("failed to read glob match: {0}")]
  Glob(#[from] glob::GlobError),
}

/// Compute the cache key for a job against a workspace root.
pub fn fingerprint(job: &Job, workspace: &Path) -> Result<String, FingerprintError> {
  let mut hasher = Sha256::new();

  field(&mut hasher, &job.name);
  field(&mut hasher, &job.image);
  match job.command() {
    Some(Command::Shell(shell)) => field(&mut hasher, &format!("shell:{shell}")),
    Some(Command::Exec(exec)) => field(&mut hasher, &format!("exec:{}", exec.join("\u{1f}"))),
    None => field(&mut hasher, ""),
  }

  let env: BTreeMap<&String, &String> = job.env.iter().collect();
  for (key, value) in env {
    field(&mut hasher, &format!("{key}={value}"));
  }

  let mut deps = job.deps.clone();
  deps.sort();
  for dep in &deps {
    field(&mut hasher, dep);
  }

  field(&mut hasher, &job.enabled().to_string());

  for pattern in &job.inputs {
    for (relpath, file_digest) in expand_input(pattern, workspace)? {
      field(&mut hasher, &relpath);
      field(&mut hasher, &file_digest);
    }
  }

  Ok(hex::encode(hasher.finalize()))
}

fn field(hasher: &mut Sha256, value: &str) {
  hasher.update(value.as_bytes());
  hasher.update([0]);
}

/// Expand one input pattern against the workspace and digest every matched
/// file, in lexicographic path order.
fn expand_input(
  pattern: &str,
  workspace: &Path,
) -> Result<Vec<(String, String)>, FingerprintError> {
  let full_pattern = workspace.join(pattern).to_string_lossy().into_owned();
  let matches = glob::glob(&full_pattern).map_err(|source| FingerprintError::Pattern {
    pattern: pattern.to_string(),
    source,
  })?;

  let mut files = Vec::new();
  for entry in matches {
    let path = entry?;
    if !path.is_file() {
      continue;
    }
    let relpath = path
      .strip_prefix(workspace)
      .unwrap_or(&path)
      .to_string_lossy()
      .into_owned();
    files.push((relpath, path));
  }
  files.sort();

  files
    .into_iter()
    .map(|(relpath, path)| Ok((relpath, digest_file(&path)?)))
    .collect()
}

fn digest_file(path: &Path) -> Result<String, io::Error> {
  let mut hasher = Sha256::new();
  let mut file = File::open(path)?;
  let mut buffer = [0u8; 8192];
  loop {
    let read = file.read(&mut buffer)?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }
  Ok(hex::encode(hasher.finalize()))
}
