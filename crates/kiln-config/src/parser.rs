//! Two-pass configuration decoding.
//!
//! Jobs may reference attributes of other jobs (`${jobs.build.outputs[0]}`),
//! and those references only resolve once the referenced job has itself been
//! decoded. The decoder therefore runs a shallow pass first, extracting job
//! labels and scanning raw attribute expressions for `jobs.*` references,
//! then decodes job bodies in topological order of that reference graph.
//! Each decoded job is bound back into the evaluation context so later jobs
//! see it; a bounded fixed-point retry remains as a safety net for
//! self-referential expressions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use hcl::expr::Expression;
use hcl::{Body, Map, Value};
use indexmap::IndexMap;
use kiln_graph::{Graph, IterError};
use kiln_job::{Job, JobError};
use kiln_vault::Vault;

use crate::context::EvalContext;
use crate::error::ConfigError;
use crate::refs;
use crate::settings::{CacheSettings, FileSettings, S3Settings, Settings};

/// Fixed-point rounds a single job decode may take before the residual
/// diagnostic is surfaced.
const DECODE_ROUNDS: usize = 20;

/// Configuration parser and decoder. Owns the document body and the
/// evaluation context for the duration of a decode.
pub struct Parser {
  body: Body,
  ctx: EvalContext,
  workdir: PathBuf,
  jobs: Map<String, Value>,
}

impl Parser {
  /// Parse a configuration document, resolving relative paths and git
  /// metadata against the current directory.
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    Self::parse_in(text, ".")
  }

  /// Parse a configuration document against an explicit working directory.
  pub fn parse_in(text: &str, workdir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let body = hcl::parse(text)?;
    Ok(Self {
      body,
      ctx: EvalContext::new(),
      workdir: workdir.into(),
      jobs: Map::new(),
    })
  }

  pub fn workdir(&self) -> &Path {
    &self.workdir
  }

  /// Decode the top-level `env` list and bind the result as the `env`
  /// variable. Items are `KEY` or `KEY=DEFAULT`; the process environment
  /// wins, the default applies when the variable is unset or empty. Git
  /// metadata is merged on top and degrades to empty values outside a
  /// repository.
  pub fn decode_env(&mut self) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut env = BTreeMap::new();

    if let Some(expr) = attr_expr(&self.body, "env") {
      let value = self.ctx.evaluate(&expr)?;
      for item in expect_string_list(value, "config", "env")? {
        let (key, default) = match item.split_once('=') {
          Some((key, default)) => (key.to_string(), default.to_string()),
          None => (item, String::new()),
        };
        let mut value = std::env::var(&key).unwrap_or_default();
        if value.is_empty() {
          value = default;
        }
        env.insert(key, value);
      }
    }

    for (key, value) in kiln_git::git_env(&self.workdir) {
      env.insert(key, value);
    }

    self.ctx.bind("env", string_map_value(&env));
    Ok(env)
  }

  /// Decode the `secrets` list and bind the result as the `secrets`
  /// variable. With a configured vault holding a token the secrets are
  /// loaded from the vault workspace; otherwise each name is read from the
  /// process environment.
  pub async fn decode_secrets(&mut self) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut secrets = BTreeMap::new();

    let names = match attr_expr(&self.body, "secrets") {
      Some(expr) => {
        let value = self.ctx.evaluate(&expr)?;
        expect_string_list(value, "config", "secrets")?
      }
      None => {
        self.ctx.bind("secrets", Value::Object(Map::new()));
        return Ok(secrets);
      }
    };

    for name in &names {
      secrets.insert(name.clone(), std::env::var(name).unwrap_or_default());
    }

    if let Some(vault) = self.vault_settings()? {
      if vault.has_token() {
        let workspace = self
          .eval_string_attr(&self.body, "config", "workspace")?
          .unwrap_or_else(|| "default".to_string());
        vault.init()?;
        secrets = vault.load_secrets(&workspace, &names).await?;
      }
    }

    self.ctx.bind("secrets", string_map_value(&secrets));
    Ok(secrets)
  }

  /// Decode the top-level `engine`/`workspace` attributes and the `cache`
  /// block. Runs after [`decode_secrets`](Self::decode_secrets) so cache
  /// credentials may reference `secrets.*`.
  pub fn decode_settings(&self) -> Result<Settings, ConfigError> {
    let engine = self.eval_string_attr(&self.body, "config", "engine")?;
    let workspace = self.eval_string_attr(&self.body, "config", "workspace")?;

    let cache = match find_block(&self.body, "cache") {
      None => None,
      Some(cache_body) => {
        let s3 = match find_block(&cache_body, "s3") {
          Some(body) => Some(S3Settings {
            access_key: self.require_string_attr(&body, "cache.s3", "access_key")?,
            secret_key: self.require_string_attr(&body, "cache.s3", "secret_key")?,
            bucket: self.require_string_attr(&body, "cache.s3", "bucket")?,
            endpoint: self.require_string_attr(&body, "cache.s3", "endpoint")?,
            region: self.require_string_attr(&body, "cache.s3", "region")?,
          }),
          None => None,
        };
        let file = match find_block(&cache_body, "file") {
          Some(body) => Some(FileSettings {
            dir: self.require_string_attr(&body, "cache.file", "dir")?,
          }),
          None => None,
        };
        Some(CacheSettings { s3, file })
      }
    };

    Ok(Settings {
      engine,
      workspace,
      cache,
    })
  }

  /// Decode all `job` blocks. See the module docs for the two-pass
  /// algorithm. The returned jobs are in topological order of the reference
  /// graph, with implicit references merged into each job's `deps`.
  pub fn decode_jobs(&mut self) -> Result<Vec<Job>, ConfigError> {
    // Shallow pass: labels and raw bodies.
    let mut graph = Graph::new();
    let mut blocks: Vec<(String, Body)> = Vec::new();

    for block in self.body.blocks().filter(|b| b.identifier.as_str() == "job") {
      let name = block
        .labels
        .first()
        .map(|label| label.as_str().to_string())
        .unwrap_or_default();
      if name.is_empty() {
        return Err(ConfigError::Job(JobError::EmptyName));
      }
      if graph.contains(&name) {
        return Err(ConfigError::DuplicateJob { name });
      }
      graph.add_node(&name);
      blocks.push((name, block.body.clone()));
    }

    // Reference scan: every `jobs.<ref>` in an attribute expression makes
    // <ref> a predecessor. Self-references stay out of the graph and are
    // handled by the fixed-point retry instead.
    let mut implicit: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, body) in &blocks {
      let mut found = BTreeSet::new();
      for attr in body.attributes() {
        refs::collect_job_refs(&attr.expr, &mut found);
      }
      found.remove(name);

      for referenced in found {
        if !graph.contains(&referenced) {
          return Err(ConfigError::UndefinedJob {
            job: name.clone(),
            reference: referenced,
          });
        }
        graph.add_dep(name.clone(), referenced.clone());
        implicit.entry(name.clone()).or_default().insert(referenced);
      }
    }

    let bodies: BTreeMap<&str, &Body> = blocks
      .iter()
      .map(|(name, body)| (name.as_str(), body))
      .collect();

    // Topological decode.
    let mut jobs = Vec::with_capacity(blocks.len());
    let result = graph.iter_sorted(|name| {
      let mut job = self.decode_job(name, bodies[name])?;

      if let Some(referenced) = implicit.get(name) {
        for reference in referenced {
          if !job.deps.contains(reference) {
            job.deps.push(reference.clone());
          }
        }
      }

      for dep in &job.deps {
        if !graph.contains(dep) {
          return Err(ConfigError::UndefinedJob {
            job: name.to_string(),
            reference: dep.clone(),
          });
        }
      }

      job.validate()?;
      self.bind_job(&job);
      jobs.push(job);
      Ok(())
    });

    match result {
      Ok(()) => Ok(jobs),
      Err(IterError::Cycle(err)) => Err(ConfigError::Cycle(err)),
      Err(IterError::Visit { error, .. }) => Err(error),
    }
  }

  /// Bounded fixed-point decode of a single job body. Each round binds the
  /// (possibly partial) job into the `jobs` variable and retries while the
  /// residual diagnostic keeps changing; two identical residuals in a row
  /// mean no further binding will make progress.
  fn decode_job(&mut self, name: &str, body: &Body) -> Result<Job, ConfigError> {
    let mut last: Option<String> = None;

    for _ in 0..DECODE_ROUNDS {
      let (job, residual) = self.try_decode(name, body)?;
      self.bind_job(&job);

      match residual {
        None => return Ok(job),
        Some(message) => {
          if last.as_deref() == Some(message.as_str()) {
            return Err(ConfigError::Eval { message });
          }
          tracing::trace!(job = name, residual = %message, "job decode round incomplete");
          last = Some(message);
        }
      }
    }

    Err(ConfigError::DepthLimit {
      job: name.to_string(),
      rounds: DECODE_ROUNDS,
      last: last.unwrap_or_default(),
    })
  }

  /// Decode as much of a job body as currently evaluates. Evaluation errors
  /// are residuals (the caller retries); shape errors are final.
  fn try_decode(&self, name: &str, body: &Body) -> Result<(Job, Option<String>), ConfigError> {
    if let Some(block) = body.blocks().next() {
      return Err(ConfigError::UnknownBlock {
        job: name.to_string(),
        block: block.identifier.as_str().to_string(),
      });
    }

    let mut job = Job {
      name: name.to_string(),
      ..Job::default()
    };
    let mut residual = None;

    for attr in body.attributes() {
      let key = attr.key.as_str();
      let value = match self.ctx.evaluate(&attr.expr) {
        Ok(value) => value,
        Err(err) => {
          if residual.is_none() {
            residual = Some(err.to_string());
          }
          continue;
        }
      };

      match key {
        "image" => job.image = expect_string(value, name, key)?,
        "shell" => job.shell = Some(expect_string(value, name, key)?),
        "exec" => job.exec = Some(expect_string_list(value, name, key)?),
        "inputs" => job.inputs = expect_string_list(value, name, key)?,
        "outputs" => job.outputs = expect_string_list(value, name, key)?,
        "deps" => job.deps = expect_string_list(value, name, key)?,
        "env" => job.env = expect_string_map(value, name, key)?,
        "condition" => job.condition = Some(expect_bool(value, name, key)?),
        "engine" => job.engine = Some(expect_string(value, name, key)?),
        _ => {
          return Err(ConfigError::UnknownAttribute {
            job: name.to_string(),
            attr: key.to_string(),
          });
        }
      }
    }

    Ok((job, residual))
  }

  fn bind_job(&mut self, job: &Job) {
    self.jobs.insert(job.name.clone(), job_value(job));
    self.ctx.bind("jobs", Value::Object(self.jobs.clone()));
  }

  fn vault_settings(&self) -> Result<Option<Vault>, ConfigError> {
    let body = match find_block(&self.body, "vault") {
      Some(body) => body,
      None => return Ok(None),
    };
    let addr = self
      .eval_string_attr(&body, "vault", "addr")?
      .unwrap_or_default();
    let token = self
      .eval_string_attr(&body, "vault", "token")?
      .unwrap_or_default();
    let mount = self.eval_string_attr(&body, "vault", "path")?;
    Ok(Some(Vault::new(addr, token, mount)))
  }

  fn eval_string_attr(
    &self,
    body: &Body,
    scope: &str,
    key: &str,
  ) -> Result<Option<String>, ConfigError> {
    match attr_expr(body, key) {
      Some(expr) => {
        let value = self.ctx.evaluate(&expr)?;
        Ok(Some(expect_string(value, scope, key)?))
      }
      None => Ok(None),
    }
  }

  fn require_string_attr(&self, body: &Body, scope: &str, key: &str) -> Result<String, ConfigError> {
    self.eval_string_attr(body, scope, key)?.ok_or_else(|| {
      ConfigError::MissingAttribute {
        scope: scope.to_string(),
        attr: key.to_string(),
      }
    })
  }
}

fn attr_expr(body: &Body, key: &str) -> Option<Expression> {
  body
    .attributes()
    .find(|attr| attr.key.as_str() == key)
    .map(|attr| attr.expr.clone())
}

fn find_block(body: &Body, identifier: &str) -> Option<Body> {
  body
    .blocks()
    .find(|block| block.identifier.as_str() == identifier)
    .map(|block| block.body.clone())
}

fn coerce_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn type_mismatch(scope: &str, attr: &str, expected: &'static str) -> ConfigError {
  ConfigError::TypeMismatch {
    scope: scope.to_string(),
    attr: attr.to_string(),
    expected,
  }
}

fn expect_string(value: Value, scope: &str, attr: &str) -> Result<String, ConfigError> {
  coerce_string(&value).ok_or_else(|| type_mismatch(scope, attr, "a string"))
}

fn expect_string_list(value: Value, scope: &str, attr: &str) -> Result<Vec<String>, ConfigError> {
  value
    .as_array()
    .ok_or_else(|| type_mismatch(scope, attr, "a list of strings"))?
    .iter()
    .map(|item| coerce_string(item).ok_or_else(|| type_mismatch(scope, attr, "a list of strings")))
    .collect()
}

fn expect_string_map(
  value: Value,
  scope: &str,
  attr: &str,
) -> Result<IndexMap<String, String>, ConfigError> {
  value
    .as_object()
    .ok_or_else(|| type_mismatch(scope, attr, "a map of strings"))?
    .iter()
    .map(|(key, item)| {
      coerce_string(item)
        .map(|item| (key.clone(), item))
        .ok_or_else(|| type_mismatch(scope, attr, "a map of strings"))
    })
    .collect()
}

fn expect_bool(value: Value, scope: &str, attr: &str) -> Result<bool, ConfigError> {
  value
    .as_bool()
    .ok_or_else(|| type_mismatch(scope, attr, "a bool"))
}

fn string_map_value(map: &BTreeMap<String, String>) -> Value {
  Value::Object(
    map
      .iter()
      .map(|(key, value)| (key.clone(), Value::from(value.clone())))
      .collect(),
  )
}

fn string_list_value(items: &[String]) -> Value {
  Value::Array(items.iter().map(|item| Value::from(item.clone())).collect())
}

fn job_value(job: &Job) -> Value {
  let mut value = Map::new();
  value.insert("name".to_string(), Value::from(job.name.clone()));
  value.insert("image".to_string(), Value::from(job.image.clone()));
  if let Some(shell) = &job.shell {
    value.insert("shell".to_string(), Value::from(shell.clone()));
  }
  if let Some(exec) = &job.exec {
    value.insert("exec".to_string(), string_list_value(exec));
  }
  value.insert("inputs".to_string(), string_list_value(&job.inputs));
  value.insert("outputs".to_string(), string_list_value(&job.outputs));
  value.insert("deps".to_string(), string_list_value(&job.deps));
  value.insert(
    "env".to_string(),
    Value::Object(
      job
        .env
        .iter()
        .map(|(key, item)| (key.clone(), Value::from(item.clone())))
        .collect(),
    ),
  );
  if let Some(condition) = job.condition {
    value.insert("condition".to_string(), Value::from(condition));
  }
  if let Some(engine) = &job.engine {
    value.insert("engine".to_string(), Value::from(engine.clone()));
  }
  Value::Object(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(config: &str) -> Parser {
    let dir = tempfile::tempdir().unwrap();
    Parser::parse_in(config, dir.path()).unwrap()
  }

  #[test]
  fn test_syntax_error_is_reported() {
    let result = Parser::parse("job \"a\" {\n");
    assert!(matches!(result, Err(ConfigError::Syntax(_))));
  }

  #[test]
  fn test_decode_env_fallback() {
    std::env::set_var("KILN_PARSER_BAR", "x");
    std::env::remove_var("KILN_PARSER_FOO");

    let mut parser = parse(r#"env = ["KILN_PARSER_FOO=default", "KILN_PARSER_BAR"]"#);
    let env = parser.decode_env().unwrap();

    assert_eq!(env["KILN_PARSER_FOO"], "default");
    assert_eq!(env["KILN_PARSER_BAR"], "x");
  }

  #[test]
  fn test_decode_env_outside_repository_has_empty_git_keys() {
    let mut parser = parse("env = []");
    let env = parser.decode_env().unwrap();

    assert_eq!(env["GIT_TAG"], "");
    assert_eq!(env["GIT_COMMIT"], "");
    assert_eq!(env["GIT_COMMIT_SHORT"], "");
    assert_eq!(env["GIT_BRANCH"], "");
  }

  #[tokio::test]
  async fn test_decode_secrets_from_process_env() {
    std::env::set_var("KILN_PARSER_SECRET", "hunter2");

    let mut parser = parse(r#"secrets = ["KILN_PARSER_SECRET", "KILN_PARSER_UNSET"]"#);
    let secrets = parser.decode_secrets().await.unwrap();

    assert_eq!(secrets["KILN_PARSER_SECRET"], "hunter2");
    assert_eq!(secrets["KILN_PARSER_UNSET"], "");
  }

  #[tokio::test]
  async fn test_secrets_usable_in_jobs() {
    std::env::set_var("KILN_PARSER_TOKEN", "tok");

    let mut parser = parse(
      r#"
      secrets = ["KILN_PARSER_TOKEN"]

      job "deploy" {
        shell = "deploy"
        env = {
          TOKEN = "${secrets.KILN_PARSER_TOKEN}"
        }
      }
      "#,
    );
    parser.decode_secrets().await.unwrap();
    let jobs = parser.decode_jobs().unwrap();

    assert_eq!(jobs[0].env["TOKEN"], "tok");
  }

  #[test]
  fn test_decode_settings() {
    let parser = parse(
      r#"
      engine = "docker"
      workspace = "build"

      cache {
        file {
          dir = "/tmp/kiln-cache"
        }
      }
      "#,
    );
    let settings = parser.decode_settings().unwrap();

    assert_eq!(settings.engine.as_deref(), Some("docker"));
    assert_eq!(settings.workspace.as_deref(), Some("build"));
    let cache = settings.cache.unwrap();
    assert_eq!(cache.file.unwrap().dir, "/tmp/kiln-cache");
    assert!(cache.s3.is_none());
  }

  #[test]
  fn test_decode_s3_settings_require_all_fields() {
    let parser = parse(
      r#"
      cache {
        s3 {
          access_key = "ak"
          secret_key = "sk"
          bucket = "artifacts"
          endpoint = "http://minio:9000"
        }
      }
      "#,
    );
    assert!(matches!(
      parser.decode_settings(),
      Err(ConfigError::MissingAttribute { .. })
    ));
  }

  #[test]
  fn test_cross_reference_resolves_and_orders() {
    let mut parser = parse(
      r#"
      job "b" {
        shell = "link"
        env = {
          X = "${jobs.a.outputs[0]}"
        }
      }

      job "a" {
        shell = "compile"
        outputs = ["bin/app"]
      }
      "#,
    );
    parser.decode_env().unwrap();
    let jobs = parser.decode_jobs().unwrap();

    assert_eq!(jobs[0].name, "a");
    assert_eq!(jobs[1].name, "b");
    assert_eq!(jobs[1].env["X"], "bin/app");
    assert!(jobs[1].deps.contains(&"a".to_string()));
  }

  #[test]
  fn test_explicit_deps_are_kept_alongside_implicit() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "one"
      }

      job "b" {
        shell = "two"
      }

      job "c" {
        shell = "${jobs.b.name}"
        deps = ["a"]
      }
      "#,
    );
    let jobs = parser.decode_jobs().unwrap();

    let c = jobs.iter().find(|job| job.name == "c").unwrap();
    assert!(c.deps.contains(&"a".to_string()));
    assert!(c.deps.contains(&"b".to_string()));
  }

  #[test]
  fn test_reference_cycle_is_reported() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "${jobs.b.name}"
      }

      job "b" {
        shell = "${jobs.a.name}"
      }
      "#,
    );
    match parser.decode_jobs() {
      Err(ConfigError::Cycle(err)) => assert_eq!(err.names, vec!["a", "b"]),
      other => panic!("expected cycle error, got {other:?}"),
    }
  }

  #[test]
  fn test_undefined_reference_is_reported() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "${jobs.ghost.name}"
      }
      "#,
    );
    match parser.decode_jobs() {
      Err(ConfigError::UndefinedJob { job, reference }) => {
        assert_eq!(job, "a");
        assert_eq!(reference, "ghost");
      }
      other => panic!("expected undefined job error, got {other:?}"),
    }
  }

  #[test]
  fn test_undefined_explicit_dep_is_reported() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "one"
        deps = ["ghost"]
      }
      "#,
    );
    assert!(matches!(
      parser.decode_jobs(),
      Err(ConfigError::UndefinedJob { .. })
    ));
  }

  #[test]
  fn test_duplicate_job_is_reported() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "one"
      }

      job "a" {
        shell = "two"
      }
      "#,
    );
    assert!(matches!(
      parser.decode_jobs(),
      Err(ConfigError::DuplicateJob { .. })
    ));
  }

  #[test]
  fn test_self_reference_resolves_via_fixed_point() {
    let mut parser = parse(
      r#"
      job "a" {
        outputs = ["bin/a"]
        shell = "build -o ${jobs.a.outputs[0]}"
      }
      "#,
    );
    let jobs = parser.decode_jobs().unwrap();
    assert_eq!(jobs[0].shell.as_deref(), Some("build -o bin/a"));
    assert!(jobs[0].deps.is_empty());
  }

  #[test]
  fn test_unresolvable_self_reference_errors() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "${jobs.a.missing_attribute}"
      }
      "#,
    );
    assert!(parser.decode_jobs().is_err());
  }

  #[test]
  fn test_condition_is_evaluated_at_decode_time() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "one"
        condition = equal("x", "y")
      }
      "#,
    );
    let jobs = parser.decode_jobs().unwrap();
    assert_eq!(jobs[0].condition, Some(false));
    assert!(!jobs[0].enabled());
  }

  #[test]
  fn test_unknown_attribute_is_reported() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "one"
        retries = 3
      }
      "#,
    );
    assert!(matches!(
      parser.decode_jobs(),
      Err(ConfigError::UnknownAttribute { .. })
    ));
  }

  #[test]
  fn test_env_map_coerces_scalars() {
    let mut parser = parse(
      r#"
      job "a" {
        shell = "serve"
        env = {
          PORT = 8080
          DEBUG = true
        }
      }
      "#,
    );
    let jobs = parser.decode_jobs().unwrap();
    assert_eq!(jobs[0].env["PORT"], "8080");
    assert_eq!(jobs[0].env["DEBUG"], "true");
  }

  #[test]
  fn test_job_missing_command_fails_validation() {
    let mut parser = parse(
      r#"
      job "a" {
        image = "alpine"
      }
      "#,
    );
    assert!(matches!(
      parser.decode_jobs(),
      Err(ConfigError::Job(JobError::MissingCommand { .. }))
    ));
  }

  #[test]
  fn test_decode_order_follows_reference_chain() {
    let mut parser = parse(
      r#"
      job "push" {
        shell = "push ${jobs.package.outputs[0]}"
      }

      job "package" {
        outputs = ["dist/pkg.tar"]
        shell = "pack ${jobs.build.outputs[0]}"
      }

      job "build" {
        outputs = ["bin/app"]
        shell = "compile"
      }
      "#,
    );
    let jobs = parser.decode_jobs().unwrap();
    let names: Vec<&str> = jobs.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(names, vec!["build", "package", "push"]);

    let push = &jobs[2];
    assert_eq!(push.shell.as_deref(), Some("push dist/pkg.tar"));
  }
}
