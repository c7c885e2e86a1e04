use std::collections::BTreeSet;
use std::path::{Component, Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// A named, containerized command with declared inputs, outputs, environment
/// and dependencies. Jobs are produced by the configuration decoder and
/// consumed by the scheduler; all expressions have been resolved by the time
/// a `Job` exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
  /// Unique name within the configuration (the block label).
  pub name: String,

  /// Container image reference. Empty for in-process engines.
  #[serde(default)]
  pub image: String,

  /// Command as a shell string. Mutually exclusive with `exec`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shell: Option<String>,

  /// Command as an argv vector. Mutually exclusive with `shell`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exec: Option<Vec<String>>,

  /// Input file paths (globs permitted); part of the fingerprint.
  #[serde(default)]
  pub inputs: Vec<String>,

  /// Output file paths produced by the job; cached as artifact blobs.
  #[serde(default)]
  pub outputs: Vec<String>,

  /// Environment passed to the command, fully resolved.
  #[serde(default)]
  pub env: IndexMap<String, String>,

  /// Names of predecessor jobs. After decoding this includes both explicit
  /// `deps` entries and dependencies implied by expression references.
  #[serde(default)]
  pub deps: Vec<String>,

  /// Resolved `condition` expression; `None` means unconditional.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<bool>,

  /// Executor override for this job.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub engine: Option<String>,
}

/// The command form a job declares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<'a> {
  Shell(&'a str),
  Exec(&'a [String]),
}

impl Job {
  /// The job's command, if one is declared.
  pub fn command(&self) -> Option<Command<'_>> {
    match (&self.shell, &self.exec) {
      (Some(shell), None) => Some(Command::Shell(shell)),
      (None, Some(exec)) => Some(Command::Exec(exec)),
      _ => None,
    }
  }

  /// Whether the job should run. An absent condition means yes.
  pub fn enabled(&self) -> bool {
    self.condition.unwrap_or(true)
  }

  /// Check the structural invariants: non-empty name, exactly one command
  /// form, and outputs disjoint from the job's own literal inputs.
  pub fn validate(&self) -> Result<(), JobError> {
    if self.name.is_empty() {
      return Err(JobError::EmptyName);
    }

    match (&self.shell, &self.exec) {
      (Some(_), Some(_)) => {
        return Err(JobError::ConflictingCommand {
          name: self.name.clone(),
        });
      }
      (None, None) => {
        return Err(JobError::MissingCommand {
          name: self.name.clone(),
        });
      }
      _ => {}
    }

    // Glob inputs are expanded only at fingerprint time; the disjointness
    // check applies to literal paths.
    let inputs: BTreeSet<String> = self
      .inputs
      .iter()
      .filter(|path| !is_glob(path))
      .map(|path| normalize(path))
      .collect();

    for output in &self.outputs {
      if inputs.contains(&normalize(output)) {
        return Err(JobError::OverlappingPath {
          name: self.name.clone(),
          path: output.clone(),
        });
      }
    }

    Ok(())
  }
}

fn is_glob(path: &str) -> bool {
  path.contains(['*', '?', '['])
}

/// Normalize a relative path for comparison: drop `.` components and
/// resolve `..` lexically.
fn normalize(path: &str) -> String {
  let mut parts: Vec<&str> = Vec::new();
  for component in Path::new(path).components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        parts.pop();
      }
      Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
      Component::RootDir | Component::Prefix(_) => parts.clear(),
    }
  }
  parts.join("/")
}
