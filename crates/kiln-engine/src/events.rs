//! Execution events for observability.
//!
//! Events are emitted as the scheduler drives jobs through their states,
//! letting consumers persist progress, stream it to UIs or log it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// The run has started with the given number of jobs.
  RunStarted { jobs: usize },

  /// A job was dispatched to a worker.
  JobStarted { job: String },

  /// A job's condition evaluated to false; downstream jobs treat it as
  /// satisfied.
  JobSkipped { job: String },

  /// A job's fingerprint matched a cached artifact; outputs were restored.
  JobCached { job: String },

  /// A job executed and its outputs were stored.
  JobBuilt { job: String },

  /// A job failed.
  JobFailed { job: String, reason: String },

  /// A job was not run because a transitive dependency failed.
  JobDependencyFailed { job: String, dep: String },

  /// Every job reached a successful terminal state.
  RunCompleted,

  /// At least one job failed or the run was cancelled.
  RunFailed,
}

/// Trait for receiving execution events.
///
/// The scheduler calls `notify` for each event; implementations decide what
/// to do with them (persist, broadcast, log, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel, for consumers that
/// process events asynchronously.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
