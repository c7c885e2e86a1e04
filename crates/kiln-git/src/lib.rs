//! Git metadata for configuration environments.
//!
//! Surfaces the enclosing repository's state as `GIT_*` environment keys.
//! Metadata is read by shelling out to `git`; a missing repository (or a
//! missing `git` binary) degrades every key to the empty string and is never
//! fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

pub const GIT_TAG: &str = "GIT_TAG";
pub const GIT_COMMIT: &str = "GIT_COMMIT";
pub const GIT_COMMIT_SHORT: &str = "GIT_COMMIT_SHORT";
pub const GIT_BRANCH: &str = "GIT_BRANCH";

#[derive(Debug, Error)]
pub enum GitError {
  #[error("not a git repository: {}", path.display())]
  NotARepository { path: PathBuf },

  #[error("failed to run git: {0}")]
  Spawn(#[from] std::io::Error),

  #[error("git {command} failed: {stderr}")]
  CommandFailed { command: String, stderr: String },
}

/// Handle on the repository enclosing a directory.
pub struct Repository {
  root: PathBuf,
}

impl Repository {
  /// Open the repository containing `dir`, if any.
  pub fn discover(dir: impl Into<PathBuf>) -> Result<Self, GitError> {
    let root = dir.into();
    let inside = Command::new("git")
      .args(["rev-parse", "--is-inside-work-tree"])
      .current_dir(&root)
      .output()
      .map(|output| output.status.success())
      .unwrap_or(false);

    if inside {
      Ok(Self { root })
    } else {
      Err(GitError::NotARepository { path: root })
    }
  }

  /// The tag pointing at HEAD, or an empty string when HEAD is untagged.
  pub fn tag(&self) -> Result<String, GitError> {
    let tags = self.git(&["tag", "--points-at", "HEAD"])?;
    Ok(tags.lines().next().unwrap_or_default().to_string())
  }

  /// The 40-character commit hash of HEAD.
  pub fn commit(&self) -> Result<String, GitError> {
    self.git(&["rev-parse", "HEAD"])
  }

  /// The short branch name, or an empty string on a detached HEAD.
  pub fn branch(&self) -> Result<String, GitError> {
    let name = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
    // `--abbrev-ref` prints the literal "HEAD" when detached.
    if name == "HEAD" {
      Ok(String::new())
    } else {
      Ok(name)
    }
  }

  /// The repository state as `GIT_*` keys. Individual read failures
  /// degrade their key to the empty string.
  pub fn git_env(&self) -> BTreeMap<String, String> {
    let commit = self.commit().unwrap_or_else(|err| {
      tracing::debug!(error = %err, "failed to read HEAD commit");
      String::new()
    });
    let short = commit.chars().take(8).collect();

    let mut env = BTreeMap::new();
    env.insert(GIT_TAG.to_string(), self.tag().unwrap_or_default());
    env.insert(GIT_COMMIT.to_string(), commit);
    env.insert(GIT_COMMIT_SHORT.to_string(), short);
    env.insert(GIT_BRANCH.to_string(), self.branch().unwrap_or_default());
    env
  }

  fn git(&self, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
      .args(args)
      .current_dir(&self.root)
      .output()?;

    if !output.status.success() {
      return Err(GitError::CommandFailed {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

/// The `GIT_*` keys for the repository enclosing `dir`. Without a
/// repository every key resolves to the empty string.
pub fn git_env(dir: &Path) -> BTreeMap<String, String> {
  match Repository::discover(dir) {
    Ok(repo) => repo.git_env(),
    Err(err) => {
      tracing::debug!(error = %err, "no git metadata available");
      [GIT_TAG, GIT_COMMIT, GIT_COMMIT_SHORT, GIT_BRANCH]
        .into_iter()
        .map(|key| (key.to_string(), String::new()))
        .collect()
    }
  }
}
