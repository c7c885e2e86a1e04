/// Top-level orchestration settings: default engine, workspace root and the
/// cache backend selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
  /// Default executor name; jobs may override with their own `engine`.
  pub engine: Option<String>,

  /// Root directory for inputs and outputs.
  pub workspace: Option<String>,

  pub cache: Option<CacheSettings>,
}

/// `cache { s3 {…} | file {…} }` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSettings {
  pub s3: Option<S3Settings>,
  pub file: Option<FileSettings>,
}

/// S3-compatible object store backend settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct S3Settings {
  pub access_key: String,
  pub secret_key: String,
  pub bucket: String,
  pub endpoint: String,
  pub region: String,
}

/// Local directory backend settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSettings {
  pub dir: String,
}
