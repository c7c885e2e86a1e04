use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// The graph contains a dependency cycle.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("dependency cycle involving jobs: {}", names.join(", "))]
pub struct CycleError {
  /// Names of the jobs participating in (or downstream of) the cycle,
  /// sorted for reproducible reporting.
  pub names: Vec<String>,
}

/// Errors from [`Graph::iter_sorted`].
#[derive(Debug, Error)]
pub enum IterError<E> {
  #[error(transparent)]
  Cycle(#[from] CycleError),

  /// The visit callback failed; traversal stops at the first error.
  #[error("{error}")]
  Visit { name: String, error: E },
}

/// Directed graph of jobs keyed by name.
///
/// Edges run predecessor → successor; a reverse index is kept alongside so
/// the scheduler can answer both "who do I wait for" and "who waits for me".
/// At most one edge exists per ordered pair. `add_dep` tolerates forward
/// references: a predecessor may be named before (or without) being added as
/// a node, and the edge stands once the node appears.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  nodes: BTreeSet<String>,
  successors: BTreeMap<String, BTreeSet<String>>,
  predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node. Idempotent by name.
  pub fn add_node(&mut self, name: impl Into<String>) {
    self.nodes.insert(name.into());
  }

  /// Record that `name` depends on `predecessor`.
  pub fn add_dep(&mut self, name: impl Into<String>, predecessor: impl Into<String>) {
    let name = name.into();
    let predecessor = predecessor.into();
    self
      .successors
      .entry(predecessor.clone())
      .or_default()
      .insert(name.clone());
    self.predecessors.entry(name).or_default().insert(predecessor);
  }

  pub fn contains(&self, name: &str) -> bool {
    self.nodes.contains(name)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn nodes(&self) -> impl Iterator<Item = &str> {
    self.nodes.iter().map(String::as_str)
  }

  /// Registered predecessors of a node. Edges naming nodes that were never
  /// added are not reported.
  pub fn predecessors(&self, name: &str) -> Vec<&str> {
    self
      .predecessors
      .get(name)
      .map(|preds| {
        preds
          .iter()
          .filter(|pred| self.nodes.contains(*pred))
          .map(String::as_str)
          .collect()
      })
      .unwrap_or_default()
  }

  /// Registered successors of a node.
  pub fn successors(&self, name: &str) -> Vec<&str> {
    self
      .successors
      .get(name)
      .map(|succs| {
        succs
          .iter()
          .filter(|succ| self.nodes.contains(*succ))
          .map(String::as_str)
          .collect()
      })
      .unwrap_or_default()
  }

  /// All transitive successors of a node, sorted.
  pub fn descendants(&self, name: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = self.successors(name);
    while let Some(current) = stack.pop() {
      if seen.insert(current.to_string()) {
        stack.extend(self.successors(current));
      }
    }
    seen.into_iter().collect()
  }

  /// All transitive predecessors of a node, sorted.
  pub fn ancestors(&self, name: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = self.predecessors(name);
    while let Some(current) = stack.pop() {
      if seen.insert(current.to_string()) {
        stack.extend(self.predecessors(current));
      }
    }
    seen.into_iter().collect()
  }

  /// Compute a deterministic topological order over all nodes using Kahn's
  /// algorithm, breaking ties by name. Returns a [`CycleError`] naming the
  /// unprocessed nodes when the graph is cyclic.
  pub fn sorted(&self) -> Result<Vec<String>, CycleError> {
    let mut indegree: BTreeMap<&str, usize> = self
      .nodes
      .iter()
      .map(|name| (name.as_str(), self.predecessors(name).len()))
      .collect();

    // BTreeSet keeps the ready set ordered by name, which makes the
    // traversal reproducible across runs.
    let mut ready: BTreeSet<&str> = indegree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(name, _)| *name)
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(name) = ready.iter().next().copied() {
      ready.remove(name);
      order.push(name.to_string());

      for successor in self.successors(name) {
        let degree = indegree
          .get_mut(successor)
          .expect("successor is a registered node");
        *degree -= 1;
        if *degree == 0 {
          ready.insert(successor);
        }
      }
    }

    if order.len() != self.nodes.len() {
      let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
      let names = self
        .nodes
        .iter()
        .filter(|name| !ordered.contains(name.as_str()))
        .cloned()
        .collect();
      return Err(CycleError { names });
    }

    Ok(order)
  }

  /// Visit every node exactly once in topological order. A cyclic graph
  /// fails before any node is visited; the first visit error aborts the
  /// traversal.
  pub fn iter_sorted<E, F>(&self, mut visit: F) -> Result<(), IterError<E>>
  where
    F: FnMut(&str) -> Result<(), E>,
  {
    let order = self.sorted()?;
    for name in &order {
      visit(name).map_err(|error| IterError::Visit {
        name: name.clone(),
        error,
      })?;
    }
    Ok(())
  }
}
