use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use kiln_cache::{fingerprint, Cache};
use kiln_executor::{Executor, ExecutorRegistry, OutputSinks};
use kiln_graph::Graph;
use kiln_job::Job;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};

/// Terminal state of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
  /// Condition evaluated to false; counts as satisfied downstream.
  Skipped,
  /// Outputs restored from the cache; no dispatch.
  Cached,
  /// Executed and stored.
  Built,
  Failed { reason: String },
  /// Not run because the named transitive dependency failed.
  DepFailed { dep: String },
}

impl JobOutcome {
  pub fn success(&self) -> bool {
    matches!(self, Self::Skipped | Self::Cached | Self::Built)
  }
}

/// Result of a run. Jobs left pending by a cancellation have no outcome.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
  pub outcomes: BTreeMap<String, JobOutcome>,
  pub cancelled: bool,
}

impl RunReport {
  pub fn success(&self) -> bool {
    !self.cancelled && self.outcomes.values().all(JobOutcome::success)
  }

  pub fn failed_jobs(&self) -> impl Iterator<Item = (&str, &JobOutcome)> {
    self
      .outcomes
      .iter()
      .filter(|(_, outcome)| !outcome.success())
      .map(|(name, outcome)| (name.as_str(), outcome))
  }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Root directory for inputs and outputs.
  pub workspace: PathBuf,

  /// Configuration-level default engine; jobs may override.
  pub default_engine: Option<String>,

  /// Worker pool bound.
  pub workers: usize,
}

impl SchedulerConfig {
  pub fn new(workspace: impl Into<PathBuf>) -> Self {
    Self {
      workspace: workspace.into(),
      default_engine: None,
      workers: num_cpus::get(),
    }
  }
}

/// Drives a decoded job set through the dependency graph.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies; `Scheduler::new` gives a no-op notifier.
pub struct Scheduler<N: ExecutionNotifier = NoopNotifier> {
  config: SchedulerConfig,
  executors: ExecutorRegistry,
  cache: Option<Arc<dyn Cache>>,
  notifier: N,
}

#[derive(Debug, Clone)]
enum State {
  Pending,
  Building,
  Done(JobOutcome),
}

impl Scheduler<NoopNotifier> {
  pub fn new(
    config: SchedulerConfig,
    executors: ExecutorRegistry,
    cache: Option<Arc<dyn Cache>>,
  ) -> Self {
    Self::with_notifier(config, executors, cache, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Scheduler<N> {
  pub fn with_notifier(
    config: SchedulerConfig,
    executors: ExecutorRegistry,
    cache: Option<Arc<dyn Cache>>,
    notifier: N,
  ) -> Self {
    Self {
      config,
      executors,
      cache,
      notifier,
    }
  }

  /// Run the job set to completion.
  ///
  /// Structural problems (dependency cycle, undeclared dependency, unknown
  /// engine) abort before any dispatch. Job failures do not: the failing
  /// job's transitive dependents are marked dependency-failed and sibling
  /// branches continue. On cancellation no new jobs are dispatched, the
  /// token is forwarded to in-flight executors and their termination is
  /// awaited before the report is returned.
  pub async fn run(
    &self,
    jobs: Vec<Job>,
    cancel: CancellationToken,
  ) -> Result<RunReport, EngineError> {
    let graph = build_graph(&jobs)?;
    graph.sorted()?;

    // Resolve every executor up front so configuration errors surface
    // before anything runs.
    let mut executors: BTreeMap<String, Arc<dyn Executor>> = BTreeMap::new();
    for job in &jobs {
      let executor = self
        .executors
        .select(job, self.config.default_engine.as_deref())?;
      executors.insert(job.name.clone(), executor);
    }

    let jobs: BTreeMap<String, Arc<Job>> = jobs
      .into_iter()
      .map(|job| (job.name.clone(), Arc::new(job)))
      .collect();
    let mut states: BTreeMap<String, State> = jobs
      .keys()
      .map(|name| (name.clone(), State::Pending))
      .collect();

    self.notifier.notify(ExecutionEvent::RunStarted { jobs: jobs.len() });

    let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
    let mut inflight = FuturesUnordered::new();

    loop {
      if !cancel.is_cancelled() {
        for name in ready_set(&states, &graph) {
          states.insert(name.clone(), State::Building);
          self
            .notifier
            .notify(ExecutionEvent::JobStarted { job: name.clone() });

          let job = jobs[&name].clone();
          let executor = executors[&name].clone();
          let workspace = self.config.workspace.clone();
          let cache = self.cache.clone();
          let semaphore = semaphore.clone();
          let cancel = cancel.clone();

          inflight.push(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = run_job(&job, &workspace, cache.as_deref(), &*executor, &cancel).await;
            (name, outcome)
          });
        }
      }

      let Some((name, outcome)) = inflight.next().await else {
        break;
      };

      self.notify_outcome(&name, &outcome);

      if !outcome.success() {
        // Abort scheduling of everything downstream; siblings continue.
        for dependent in graph.descendants(&name) {
          if matches!(states.get(&dependent), Some(State::Pending)) {
            self.notifier.notify(ExecutionEvent::JobDependencyFailed {
              job: dependent.clone(),
              dep: name.clone(),
            });
            states.insert(dependent, State::Done(JobOutcome::DepFailed { dep: name.clone() }));
          }
        }
      }

      states.insert(name, State::Done(outcome));
    }

    let mut report = RunReport {
      cancelled: cancel.is_cancelled(),
      ..RunReport::default()
    };
    for (name, state) in states {
      if let State::Done(outcome) = state {
        report.outcomes.insert(name, outcome);
      }
    }

    self.notifier.notify(if report.success() {
      ExecutionEvent::RunCompleted
    } else {
      ExecutionEvent::RunFailed
    });

    Ok(report)
  }

  fn notify_outcome(&self, name: &str, outcome: &JobOutcome) {
    let event = match outcome {
      JobOutcome::Skipped => ExecutionEvent::JobSkipped {
        job: name.to_string(),
      },
      JobOutcome::Cached => ExecutionEvent::JobCached {
        job: name.to_string(),
      },
      JobOutcome::Built => ExecutionEvent::JobBuilt {
        job: name.to_string(),
      },
      JobOutcome::Failed { reason } => ExecutionEvent::JobFailed {
        job: name.to_string(),
        reason: reason.clone(),
      },
      JobOutcome::DepFailed { dep } => ExecutionEvent::JobDependencyFailed {
        job: name.to_string(),
        dep: dep.clone(),
      },
    };
    self.notifier.notify(event);
  }
}

fn build_graph(jobs: &[Job]) -> Result<Graph, EngineError> {
  let mut graph = Graph::new();
  for job in jobs {
    graph.add_node(&job.name);
  }
  for job in jobs {
    for dep in &job.deps {
      if !graph.contains(dep) {
        return Err(EngineError::UnknownDependency {
          job: job.name.clone(),
          dep: dep.clone(),
        });
      }
      graph.add_dep(&job.name, dep);
    }
  }
  Ok(graph)
}

/// Jobs whose predecessors have all reached a successful terminal state.
fn ready_set(states: &BTreeMap<String, State>, graph: &Graph) -> Vec<String> {
  states
    .iter()
    .filter(|(_, state)| matches!(state, State::Pending))
    .filter(|(name, _)| {
      graph.predecessors(name).iter().all(|pred| {
        matches!(states.get(*pred), Some(State::Done(outcome)) if outcome.success())
      })
    })
    .map(|(name, _)| name.clone())
    .collect()
}

/// Drive one job: condition, fingerprint, cache lookup, dispatch, store.
async fn run_job(
  job: &Job,
  workspace: &Path,
  cache: Option<&dyn Cache>,
  executor: &dyn Executor,
  cancel: &CancellationToken,
) -> JobOutcome {
  if !job.enabled() {
    tracing::info!(job = %job.name, "condition is false, skipping");
    return JobOutcome::Skipped;
  }

  let key = match fingerprint(job, workspace) {
    Ok(key) => key,
    Err(err) => {
      return JobOutcome::Failed {
        reason: format!("fingerprint failed: {err}"),
      };
    }
  };

  // A job with no declared outputs has nothing to cache; it always
  // dispatches.
  let cache = cache.filter(|_| !job.outputs.is_empty());

  if let Some(cache) = cache {
    match cache.lookup(&key, &job.outputs).await {
      Ok(Some(artifact)) => match cache.restore(&artifact, workspace).await {
        Ok(()) => {
          tracing::info!(job = %job.name, fingerprint = %key, "cache hit");
          return JobOutcome::Cached;
        }
        Err(err) => {
          tracing::warn!(job = %job.name, error = %err, "artifact restore failed, rebuilding");
        }
      },
      Ok(None) => {}
      // Lookup failures degrade to a miss.
      Err(err) => {
        tracing::warn!(job = %job.name, error = %err, "cache lookup failed, treating as miss");
      }
    }
  }

  tracing::info!(job = %job.name, fingerprint = %key, "building");
  match executor
    .run(job, workspace, &job.env, OutputSinks::inherit(), cancel)
    .await
  {
    Ok(0) => {
      if let Some(cache) = cache {
        // Store failures are warnings; the build itself succeeded.
        if let Err(err) = cache.store(&key, workspace, &job.outputs).await {
          tracing::warn!(job = %job.name, error = %err, "cache store failed");
        }
      }
      JobOutcome::Built
    }
    Ok(code) => JobOutcome::Failed {
      reason: format!("exit status {code}"),
    },
    Err(err) => JobOutcome::Failed {
      reason: err.to_string(),
    },
  }
}
