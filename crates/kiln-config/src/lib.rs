//! Configuration evaluation.
//!
//! A kiln configuration is an HCL document with top-level `env`, `secrets`,
//! `vault`, `cache`, `engine` and `workspace` declarations plus repeated
//! `job "name" { … }` blocks. The [`Parser`] decodes it in passes: the
//! environment and secrets are bound into the evaluation context first, then
//! jobs are decoded in topological order of their cross-references so that
//! expressions like `${jobs.build.outputs[0]}` resolve against already
//! decoded jobs.

mod context;
mod error;
mod parser;
mod refs;
mod settings;

pub use context::EvalContext;
pub use error::ConfigError;
pub use parser::Parser;
pub use settings::{CacheSettings, FileSettings, S3Settings, Settings};
