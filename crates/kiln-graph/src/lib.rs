mod graph;

pub use graph::{CycleError, Graph, IterError};
