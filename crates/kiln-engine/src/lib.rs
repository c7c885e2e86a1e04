//! Job scheduling.
//!
//! The scheduler walks the dependency graph of a decoded job set: jobs whose
//! predecessors have all reached a successful terminal state form the ready
//! set and are dispatched to a bounded worker pool. Each dispatched job is
//! fingerprinted and looked up in the cache before its executor runs; cache
//! hits restore outputs without dispatch.

mod error;
mod events;
mod scheduler;

pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use scheduler::{JobOutcome, RunReport, Scheduler, SchedulerConfig};
