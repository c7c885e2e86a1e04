use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kiln_cache::{Cache, FsCache, S3Cache, S3Config};
use kiln_config::{Parser, Settings};
use kiln_engine::{Scheduler, SchedulerConfig};
use kiln_executor::ExecutorRegistry;
use kiln_graph::Graph;
use kiln_job::Job;

/// kiln - declarative build-and-task orchestrator
#[derive(ClapParser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the configuration file
  #[arg(long, short = 'f', global = true, default_value = "kiln.hcl")]
  file: PathBuf,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run all jobs, or a target job and its transitive dependencies
  Run {
    /// Job to run; all jobs when omitted
    target: Option<String>,

    /// Worker pool size (default: number of host CPUs)
    #[arg(long)]
    workers: Option<usize>,
  },

  /// List jobs in topological order
  Jobs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Run { target, workers }) => {
      rt.block_on(run(cli.file, target, workers))?;
    }
    Some(Commands::Jobs) => {
      rt.block_on(list_jobs(cli.file))?;
    }
    None => {
      println!("kiln - use --help to see available commands");
    }
  }

  Ok(())
}

async fn decode(file: &Path) -> Result<(Vec<Job>, Settings)> {
  let text = tokio::fs::read_to_string(file)
    .await
    .with_context(|| format!("failed to read configuration: {}", file.display()))?;

  let workdir = std::env::current_dir().context("failed to resolve working directory")?;
  let mut parser = Parser::parse_in(&text, workdir).context("failed to parse configuration")?;

  parser.decode_env().context("failed to decode env")?;
  parser
    .decode_secrets()
    .await
    .context("failed to decode secrets")?;
  let settings = parser
    .decode_settings()
    .context("failed to decode settings")?;
  let jobs = parser.decode_jobs().context("failed to decode jobs")?;

  Ok((jobs, settings))
}

async fn run(file: PathBuf, target: Option<String>, workers: Option<usize>) -> Result<()> {
  let (mut jobs, settings) = decode(&file).await?;

  if let Some(target) = &target {
    jobs = select_target(jobs, target)?;
  }

  let workspace = match &settings.workspace {
    Some(dir) => PathBuf::from(dir),
    None => std::env::current_dir()?,
  };
  tokio::fs::create_dir_all(&workspace)
    .await
    .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

  let cache = build_cache(&settings)?;

  let mut config = SchedulerConfig::new(workspace);
  config.default_engine = settings.engine.clone();
  if let Some(workers) = workers {
    config.workers = workers.max(1);
  }

  let scheduler = Scheduler::new(config, ExecutorRegistry::builtin(), cache);

  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received, cancelling run");
        cancel.cancel();
      }
    });
  }

  let report = scheduler
    .run(jobs, cancel)
    .await
    .context("scheduling failed")?;

  for (name, outcome) in &report.outcomes {
    tracing::info!(job = %name, outcome = ?outcome, "job finished");
  }

  if report.cancelled {
    bail!("run cancelled");
  }
  if !report.success() {
    let failed: Vec<String> = report
      .failed_jobs()
      .map(|(name, _)| name.to_string())
      .collect();
    bail!("run failed: {}", failed.join(", "));
  }

  Ok(())
}

async fn list_jobs(file: PathBuf) -> Result<()> {
  let (jobs, _) = decode(&file).await?;

  let graph = job_graph(&jobs);
  for name in graph.sorted().context("configuration has a cycle")? {
    println!("{name}");
  }

  Ok(())
}

/// Restrict the job set to a target and its transitive dependencies.
fn select_target(jobs: Vec<Job>, target: &str) -> Result<Vec<Job>> {
  let graph = job_graph(&jobs);
  if !graph.contains(target) {
    bail!("no job named '{target}' in the configuration");
  }

  let mut keep = graph.ancestors(target);
  keep.push(target.to_string());

  Ok(
    jobs
      .into_iter()
      .filter(|job| keep.contains(&job.name))
      .collect(),
  )
}

fn job_graph(jobs: &[Job]) -> Graph {
  let mut graph = Graph::new();
  for job in jobs {
    graph.add_node(&job.name);
  }
  for job in jobs {
    for dep in &job.deps {
      graph.add_dep(&job.name, dep);
    }
  }
  graph
}

fn build_cache(settings: &Settings) -> Result<Option<Arc<dyn Cache>>> {
  let Some(cache) = &settings.cache else {
    return Ok(None);
  };

  if let Some(s3) = &cache.s3 {
    let config = S3Config {
      access_key: s3.access_key.clone(),
      secret_key: s3.secret_key.clone(),
      bucket: s3.bucket.clone(),
      endpoint: s3.endpoint.clone(),
      region: s3.region.clone(),
    };
    let cache = S3Cache::new(&config).context("failed to configure s3 cache")?;
    return Ok(Some(Arc::new(cache)));
  }

  if let Some(file) = &cache.file {
    return Ok(Some(Arc::new(FsCache::new(&file.dir))));
  }

  Ok(None)
}
