//! End-to-end pipeline tests: configuration text through decode, scheduling,
//! the local executor and the file cache.

use std::sync::Arc;

use kiln_cache::{Cache, FsCache};
use kiln_config::Parser;
use kiln_engine::{JobOutcome, RunReport, Scheduler, SchedulerConfig};
use kiln_executor::ExecutorRegistry;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
env = ["KILN_PIPELINE_GREETING=hello", "KILN_PIPELINE_DOCS"]

job "build" {
  outputs = ["out/build.txt"]
  shell = "mkdir -p out && printf \"$GREETING\" > out/build.txt"
  env = {
    GREETING = "${env.KILN_PIPELINE_GREETING}"
  }
}

job "package" {
  outputs = ["out/package.txt"]
  shell = "cat ${jobs.build.outputs[0]} > out/package.txt && printf ' packaged' >> out/package.txt"
}

job "docs" {
  condition = equal("${env.KILN_PIPELINE_DOCS}", "yes")
  outputs = ["out/docs.txt"]
  shell = "printf docs > out/docs.txt"
}
"#;

async fn run_pipeline(
  workspace: &std::path::Path,
  cache: Arc<dyn Cache>,
) -> RunReport {
  let mut parser = Parser::parse_in(CONFIG, workspace).unwrap();
  parser.decode_env().unwrap();
  parser.decode_secrets().await.unwrap();
  let jobs = parser.decode_jobs().unwrap();

  let scheduler = Scheduler::new(
    SchedulerConfig::new(workspace),
    ExecutorRegistry::builtin(),
    Some(cache),
  );
  scheduler.run(jobs, CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_pipeline_builds_then_replays_from_cache() {
  std::env::remove_var("KILN_PIPELINE_DOCS");

  let workspace = tempfile::tempdir().unwrap();
  let cache_dir = tempfile::tempdir().unwrap();
  let cache: Arc<dyn Cache> = Arc::new(FsCache::new(cache_dir.path()));

  // First run executes everything except the disabled docs job.
  let report = run_pipeline(workspace.path(), cache.clone()).await;
  assert!(report.success(), "first run failed: {report:?}");
  assert_eq!(report.outcomes["build"], JobOutcome::Built);
  assert_eq!(report.outcomes["package"], JobOutcome::Built);
  assert_eq!(report.outcomes["docs"], JobOutcome::Skipped);

  let package = workspace.path().join("out/package.txt");
  let first_bytes = std::fs::read(&package).unwrap();
  assert_eq!(first_bytes, b"hello packaged");

  // Purge outputs; the second run must restore them from the cache without
  // executing anything.
  std::fs::remove_dir_all(workspace.path().join("out")).unwrap();

  let report = run_pipeline(workspace.path(), cache).await;
  assert!(report.success(), "second run failed: {report:?}");
  assert_eq!(report.outcomes["build"], JobOutcome::Cached);
  assert_eq!(report.outcomes["package"], JobOutcome::Cached);

  let second_bytes = std::fs::read(&package).unwrap();
  assert_eq!(second_bytes, first_bytes);
}

#[tokio::test]
async fn test_pipeline_failure_cascades() {
  let workspace = tempfile::tempdir().unwrap();

  let config = r#"
  job "broken" {
    shell = "exit 7"
  }

  job "dependent" {
    shell = "true"
    deps = ["broken"]
  }

  job "independent" {
    outputs = ["ok.txt"]
    shell = "printf ok > ok.txt"
  }
  "#;

  let mut parser = Parser::parse_in(config, workspace.path()).unwrap();
  let jobs = parser.decode_jobs().unwrap();

  let scheduler = Scheduler::new(
    SchedulerConfig::new(workspace.path()),
    ExecutorRegistry::builtin(),
    None,
  );
  let report = scheduler.run(jobs, CancellationToken::new()).await.unwrap();

  assert!(!report.success());
  assert_eq!(
    report.outcomes["broken"],
    JobOutcome::Failed {
      reason: "exit status 7".to_string()
    }
  );
  assert_eq!(
    report.outcomes["dependent"],
    JobOutcome::DepFailed {
      dep: "broken".to_string()
    }
  );
  assert_eq!(report.outcomes["independent"], JobOutcome::Built);
  assert!(workspace.path().join("ok.txt").exists());
}
