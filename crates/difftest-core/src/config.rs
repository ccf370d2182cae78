//! Static pipeline configuration.
//!
//! Loaded once at process start from an optional JSON file, then overridden
//! by `DIFFTEST_VERBOSITY`, `DIFFTEST_USE_QUEUE` and `DIFFTEST_STORE_DIR`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;

use difftest_types::env_utils::{env_flag, env_path, env_string};
use difftest_types::InputStrategy;

use crate::store::{artifact_collection, runner_name};

pub const ENV_VERBOSITY: &str = "DIFFTEST_VERBOSITY";
pub const ENV_USE_QUEUE: &str = "DIFFTEST_USE_QUEUE";
pub const ENV_STORE_DIR: &str = "DIFFTEST_STORE_DIR";

/// Parse a verbosity name. Accepts `DEBUG`, `INFO`, `WARNING`, `ERROR`,
/// `CRITICAL`, `TRACE` and `WARN`, case-insensitively.
pub fn parse_verbosity(name: &str) -> Result<Level> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        other => Err(anyhow!("unknown verbosity level `{other}`")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Directory {
        path: PathBuf,
    },
}

/// A spool directory feeding one compiler target's worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEndpoint {
    /// Id of the compiler target consuming this queue.
    pub name: String,
    pub spool_dir: PathBuf,
}

/// One compiler-version target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerTarget {
    /// Flag-set name, e.g. `default` or `optimized`.
    pub name: String,
    pub version: String,
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl CompilerTarget {
    /// Runner and report-collection name, `<version>_<name>`.
    pub fn id(&self) -> String {
        runner_name(&self.version, &self.name)
    }

    pub fn collection(&self) -> String {
        artifact_collection(&self.version, &self.name)
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("vyper")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub max_dynamic_len: u32,
    /// Version tag stored on every generation record.
    pub version: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_dynamic_len: 32,
            version: concat!("difftest-", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub poll_interval_ms: u64,
    pub deploy_timeout_ms: u64,
    pub call_timeout_ms: u64,
    /// Storage slots captured per snapshot, from slot 0.
    pub storage_slots: usize,
    /// Memory bytes captured per snapshot.
    pub memory_bytes: usize,
    /// Strategy used when an artifact carries no stored inputs for a function.
    pub fallback_strategy: InputStrategy,
    /// Execution engine command line.
    pub executor: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            deploy_timeout_ms: 30_000,
            call_timeout_ms: 10_000,
            storage_slots: 10,
            memory_bytes: 1280,
            fallback_strategy: InputStrategy::Default,
            executor: Vec::new(),
        }
    }
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub poll_interval_ms: u64,
    /// Pending ids older than this are reported as stale.
    pub stale_after_secs: u64,
    pub compare_gas: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            stale_after_secs: 600,
            compare_gas: false,
        }
    }
}

impl AggregatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verbosity: String,
    pub store: StoreConfig,
    pub use_queue: bool,
    pub compiler_queues: Vec<QueueEndpoint>,
    pub compilers: Vec<CompilerTarget>,
    /// Target id compiled at generation time; the first target when unset.
    pub reference_compiler: Option<String>,
    pub input_strategies: Vec<InputStrategy>,
    pub generator: GeneratorConfig,
    pub runner: RunnerConfig,
    pub aggregator: AggregatorConfig,
    pub compile_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbosity: "INFO".to_string(),
            store: StoreConfig::default(),
            use_queue: false,
            compiler_queues: Vec::new(),
            compilers: Vec::new(),
            reference_compiler: None,
            input_strategies: vec![InputStrategy::Default],
            generator: GeneratorConfig::default(),
            runner: RunnerConfig::default(),
            aggregator: AggregatorConfig::default(),
            compile_timeout_ms: 60_000,
        }
    }
}

impl Config {
    /// Read `path` (defaults when `None`), apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(level) = env_string(ENV_VERBOSITY) {
            self.verbosity = level;
        }
        if let Some(flag) = env_flag(ENV_USE_QUEUE) {
            self.use_queue = flag;
        }
        if let Some(dir) = env_path(ENV_STORE_DIR) {
            self.store = StoreConfig::Directory { path: dir };
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        self.collect_validation_issues(&mut issues);
        if issues.is_empty() {
            return Ok(());
        }
        let formatted = issues
            .into_iter()
            .enumerate()
            .map(|(idx, issue)| format!("  {}. {}", idx + 1, issue))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Config validation failed:\n{formatted}");
    }

    fn collect_validation_issues(&self, issues: &mut Vec<String>) {
        if let Err(err) = parse_verbosity(&self.verbosity) {
            issues.push(err.to_string());
        }
        if self.compilers.is_empty() {
            issues.push("at least one compiler target is required".to_string());
        }
        let mut seen = HashSet::new();
        for target in &self.compilers {
            if !seen.insert(target.id()) {
                issues.push(format!("duplicate compiler target `{}`", target.id()));
            }
        }
        if let Some(reference) = &self.reference_compiler {
            if !seen.contains(reference) {
                issues.push(format!("reference compiler `{reference}` is not a target"));
            }
        }
        if self.input_strategies.is_empty() {
            issues.push("input_strategies cannot be empty".to_string());
        }
        if self.use_queue && self.compiler_queues.is_empty() {
            issues.push("queue mode needs at least one compiler queue".to_string());
        }
        for queue in &self.compiler_queues {
            if !seen.contains(&queue.name) {
                issues.push(format!("queue `{}` names no compiler target", queue.name));
            }
        }
        if self.runner.poll_interval_ms == 0 {
            issues.push("runner.poll_interval_ms must be positive".to_string());
        }
        if self.aggregator.poll_interval_ms == 0 {
            issues.push("aggregator.poll_interval_ms must be positive".to_string());
        }
        if self.compile_timeout_ms == 0 {
            issues.push("compile_timeout_ms must be positive".to_string());
        }
    }

    pub fn target(&self, id: &str) -> Result<&CompilerTarget> {
        self.compilers
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| anyhow!("unknown compiler target `{id}`"))
    }

    /// The target whose outcome is stored on generation records.
    pub fn reference_target(&self) -> Result<&CompilerTarget> {
        match &self.reference_compiler {
            Some(id) => self.target(id),
            None => self
                .compilers
                .first()
                .ok_or_else(|| anyhow!("no compiler targets configured")),
        }
    }

    /// Runner names in configuration order; the first is the divergence
    /// reference.
    pub fn runner_names(&self) -> Vec<String> {
        self.compilers.iter().map(CompilerTarget::id).collect()
    }

    pub fn queue_for(&self, target: &str) -> Option<&QueueEndpoint> {
        self.compiler_queues.iter().find(|q| q.name == target)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, version: &str) -> CompilerTarget {
        CompilerTarget {
            name: name.into(),
            version: version.into(),
            binary: default_binary(),
            extra_args: vec![],
        }
    }

    fn valid() -> Config {
        Config {
            compilers: vec![target("default", "0.3.10"), target("default", "0.3.9")],
            ..Config::default()
        }
    }

    #[test]
    fn test_verbosity_names() {
        assert_eq!(parse_verbosity("warning").unwrap(), Level::WARN);
        assert_eq!(parse_verbosity("CRITICAL").unwrap(), Level::ERROR);
        assert_eq!(parse_verbosity(" debug ").unwrap(), Level::DEBUG);
        assert!(parse_verbosity("loud").is_err());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"compilers": [{"name": "default", "version": "0.3.10"}],
                "store": {"kind": "directory", "path": "/tmp/difftest"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.poll_interval_ms, 2000);
        assert_eq!(config.runner.storage_slots, 10);
        assert_eq!(config.runner.memory_bytes, 1280);
        assert_eq!(config.compilers[0].binary, PathBuf::from("vyper"));
        assert_eq!(config.reference_target().unwrap().id(), "0.3.10_default");
        assert_eq!(
            config.store,
            StoreConfig::Directory {
                path: PathBuf::from("/tmp/difftest")
            }
        );
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let config = Config {
            compilers: vec![target("default", "0.3.10"), target("default", "0.3.10")],
            input_strategies: vec![],
            use_queue: true,
            verbosity: "chatty".into(),
            ..Config::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("duplicate compiler target `0.3.10_default`"));
        assert!(msg.contains("input_strategies cannot be empty"));
        assert!(msg.contains("queue mode"));
        assert!(msg.contains("unknown verbosity level"));
    }

    #[test]
    fn test_no_compilers_rejected() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let config = Config {
            reference_compiler: Some("0.4.0_default".into()),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runner_names_follow_config_order() {
        assert_eq!(valid().runner_names(), vec!["0.3.10_default", "0.3.9_default"]);
        assert_eq!(
            valid().compilers[1].collection(),
            "compilation_results_0_3_9_default"
        );
    }
}
