//! Configuration for ontoref.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ONTOREF_HOME, ONTOREF_DATABASE, ONTOREF_CATALOG,
//!    ONTOREF_DOCUMENTS)
//! 2. Config file (.ontoref/config.yaml)
//! 3. Defaults (~/.ontoref)
//!
//! Config file discovery:
//! - Searches current directory and parents for .ontoref/config.yaml
//! - Relative paths in the file are resolved against the project root (the
//!   directory containing .ontoref/)
//!
//! The resolved configuration is loaded once and never mutated; per-call
//! choices (generation mode, refresh) travel in the request instead.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{GenerationSettings, RetryPolicy, WorkflowSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".ontoref";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub reasoner: TransportSettings,
    #[serde(default)]
    pub reviewer: Option<TransportSettings>,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Concept catalog YAML
    pub catalog: Option<String>,
    /// Document root (`<type>/<id>.txt`)
    pub documents: Option<String>,
    /// Run journal (JSONL)
    pub journal: Option<String>,
}

/// How to reach an external JSON service (reasoner or reviewer).
///
/// `endpoint` selects HTTP; otherwise `command` selects a subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a Bearer token for `endpoint`
    #[serde(default)]
    pub token_env: Option<String>,
    /// Recorded as `model_id` on generated annotations
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_model_id() -> String {
    "unspecified".to_string()
}
fn default_timeout_seconds() -> u64 {
    120
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            endpoint: None,
            token_env: None,
            model_id: default_model_id(),
            timeout_seconds: default_timeout_seconds(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TransportSettings {
    pub fn is_configured(&self) -> bool {
        self.command.is_some() || self.endpoint.is_some()
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub database: PathBuf,
    pub catalog: PathBuf,
    pub documents: PathBuf,
    pub journal: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub generation: GenerationSettings,
    pub reasoner: TransportSettings,
    pub reviewer: Option<TransportSettings>,
    pub workflow: WorkflowSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Combine file values, environment and defaults.
///
/// `env` looks up a variable; injected so resolution is testable without
/// touching the process environment.
fn resolve(
    config_path: Option<PathBuf>,
    file: ConfigFile,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    // Base directory is the parent of .ontoref/ (i.e., grandparent of config.yaml)
    let base_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let pick = |var: &str, from_file: &Option<String>, fallback: PathBuf| -> PathBuf {
        if let Some(value) = env(var) {
            return PathBuf::from(value);
        }
        match (from_file, &base_dir) {
            (Some(p), Some(base)) => resolve_path(base, p),
            (Some(p), None) => PathBuf::from(p),
            (None, _) => fallback,
        }
    };

    let home = pick("ONTOREF_HOME", &file.paths.home, default_home);
    let database = pick(
        "ONTOREF_DATABASE",
        &file.paths.database,
        home.join("annotations.sqlite"),
    );
    let catalog = pick("ONTOREF_CATALOG", &file.paths.catalog, home.join("catalog.yaml"));
    let documents = pick("ONTOREF_DOCUMENTS", &file.paths.documents, home.join("documents"));
    let journal = pick("ONTOREF_JOURNAL", &file.paths.journal, home.join("runs.jsonl"));

    if let Some(min) = file.generation.min_confidence {
        anyhow::ensure!(
            (0.0..=1.0).contains(&min),
            "generation.min_confidence {} outside [0, 1]",
            min
        );
    }
    anyhow::ensure!(
        file.workflow.max_batch_size > 0,
        "workflow.max_batch_size must be positive"
    );

    if let Err(e) = file.reasoner.retry.validate() {
        anyhow::bail!("reasoner.retry: {}", e);
    }
    if let Some(Err(e)) = file.reviewer.as_ref().map(|r| r.retry.validate()) {
        anyhow::bail!("reviewer.retry: {}", e);
    }

    let mut workflow = file.workflow;
    if let Some(ref reviewer) = file.reviewer {
        workflow.review_timeout_seconds = reviewer.timeout_seconds;
    }

    Ok(ResolvedConfig {
        home,
        database,
        catalog,
        documents,
        journal,
        config_file: config_path,
        generation: file.generation,
        reasoner: file.reasoner,
        reviewer: file.reviewer,
        workflow,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_path = find_config_file();
    let file = match config_path {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(config_path, file, default_home, |var| std::env::var(var).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GenerationMode;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let home = PathBuf::from("/users/test/.ontoref");
        let config = resolve(None, ConfigFile::default(), home.clone(), no_env).unwrap();

        assert_eq!(config.home, home);
        assert_eq!(config.database, home.join("annotations.sqlite"));
        assert_eq!(config.catalog, home.join("catalog.yaml"));
        assert_eq!(config.documents, home.join("documents"));
        assert!(config.config_file.is_none());
        assert_eq!(config.generation.mode, GenerationMode::Balanced);
        assert_eq!(config.workflow.max_batch_size, 50);
        assert_eq!(config.workflow.max_version_retries, 3);
        assert_eq!(config.reasoner.timeout_seconds, 120);
        assert_eq!(config.reasoner.retry.max_attempts, 2);
        assert!(!config.reasoner.is_configured());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1"
paths:
  database: data/ontoref.sqlite
  catalog: /etc/ontoref/catalog.yaml
generation:
  mode: precision
  max_per_document: 40
reasoner:
  command: ./bin/propose
  args: ["--json"]
  model_id: local-7b
  timeout_seconds: 30
reviewer:
  endpoint: http://localhost:8080/review
  timeout_seconds: 15
workflow:
  max_batch_size: 20
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let config = resolve(
            Some(config_path.clone()),
            parsed,
            PathBuf::from("/unused"),
            no_env,
        )
        .unwrap();

        assert_eq!(config.database, temp.path().join("data/ontoref.sqlite"));
        assert_eq!(config.catalog, PathBuf::from("/etc/ontoref/catalog.yaml"));
        assert_eq!(config.generation.mode, GenerationMode::Precision);
        assert_eq!(config.generation.max_per_document, Some(40));
        assert_eq!(config.reasoner.command.as_deref(), Some("./bin/propose"));
        assert_eq!(config.reasoner.model_id, "local-7b");
        assert_eq!(config.workflow.max_batch_size, 20);
        assert_eq!(config.workflow.review_timeout_seconds, 15);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile =
            serde_yaml::from_str("paths:\n  database: from-file.sqlite\n").unwrap();
        let env = |var: &str| match var {
            "ONTOREF_DATABASE" => Some("/tmp/env.sqlite".to_string()),
            "ONTOREF_HOME" => Some("/srv/ontoref".to_string()),
            _ => None,
        };

        let config = resolve(
            Some(PathBuf::from("/project/.ontoref/config.yaml")),
            file,
            PathBuf::from("/unused"),
            env,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/tmp/env.sqlite"));
        assert_eq!(config.home, PathBuf::from("/srv/ontoref"));
        assert_eq!(config.catalog, PathBuf::from("/srv/ontoref/catalog.yaml"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file: ConfigFile =
            serde_yaml::from_str("generation:\n  min_confidence: 1.5\n").unwrap();
        assert!(resolve(None, file, PathBuf::from("/h"), no_env).is_err());

        let file: ConfigFile = serde_yaml::from_str("workflow:\n  max_batch_size: 0\n").unwrap();
        assert!(resolve(None, file, PathBuf::from("/h"), no_env).is_err());
    }

    #[test]
    fn test_retry_budget_is_at_most_one_retry() {
        let file: ConfigFile =
            serde_yaml::from_str("reasoner:\n  retry:\n    max_attempts: 5\n").unwrap();
        let err = resolve(None, file, PathBuf::from("/h"), no_env).unwrap_err();
        assert!(err.to_string().contains("reasoner.retry"), "{}", err);

        let file: ConfigFile = serde_yaml::from_str(
            "reviewer:\n  endpoint: http://localhost/review\n  retry:\n    max_attempts: 0\n",
        )
        .unwrap();
        assert!(resolve(None, file, PathBuf::from("/h"), no_env).is_err());

        let file: ConfigFile = serde_yaml::from_str(
            "reasoner:\n  retry:\n    max_attempts: 1\n    delay_ms: 50\n",
        )
        .unwrap();
        let config = resolve(None, file, PathBuf::from("/h"), no_env).unwrap();
        assert_eq!(config.reasoner.retry.max_attempts, 1);
        assert_eq!(config.reasoner.retry.delay_ms, 50);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
