use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Executor used when `executor_name` is absent or cannot be resolved.
pub const DEFAULT_EXECUTOR_NAME: &str = "ProcessExecutor";
/// Directory scanned for `plugin.toml` manifests when none is configured.
pub const DEFAULT_PLUGINS_PATH: &str = "./plugins";
/// Settling delay before the first application script is sent to the engine.
pub const DEFAULT_WARMUP_MS: u64 = 200;

const ENV_BUNDLE_URL: &str = "TETHER_BUNDLE_URL";
const ENV_PLUGINS_PATH: &str = "TETHER_PLUGINS_PATH";
const ENV_EXECUTOR: &str = "TETHER_EXECUTOR";

/// Bridge configuration loaded from `tether.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bundle_url: Option<String>,
    #[serde(default = "default_plugins_path")]
    pub plugins_path: PathBuf,
    #[serde(default = "default_executor_name")]
    pub executor_name: String,
    /// Where `AsyncLocalStorage` persists its data. Platform data dir when unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

/// Settings for the built-in process executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            warmup_ms: DEFAULT_WARMUP_MS,
        }
    }
}

impl ExecutorSettings {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bundle_url: None,
            plugins_path: default_plugins_path(),
            executor_name: default_executor_name(),
            storage_dir: None,
            executor: ExecutorSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse and validate config TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse bridge config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read bridge config at {}", path.display()))?;

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid bridge config at {}", path.display()))
    }

    /// Validate field contents.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.bundle_url {
            validate_nonempty("bundle_url", url)?;
        }
        validate_nonempty("executor_name", &self.executor_name)?;
        if self.plugins_path.as_os_str().is_empty() {
            bail!("plugins_path must not be empty");
        }
        if let Some(command) = &self.executor.command {
            validate_nonempty("executor.command", command)?;
        }
        for arg in &self.executor.args {
            if arg.trim().is_empty() {
                bail!("executor.args entries must not be empty");
            }
        }
        Ok(())
    }

    /// Apply `TETHER_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BUNDLE_URL) {
            self.bundle_url = Some(url);
        }
        if let Some(path) = lookup(ENV_PLUGINS_PATH) {
            self.plugins_path = PathBuf::from(path);
        }
        if let Some(name) = lookup(ENV_EXECUTOR) {
            self.executor_name = name;
        }
        self.validate()
            .context("environment overrides produced an invalid config")
    }
}

fn default_plugins_path() -> PathBuf {
    PathBuf::from(DEFAULT_PLUGINS_PATH)
}

fn default_executor_name() -> String {
    DEFAULT_EXECUTOR_NAME.to_string()
}

fn default_warmup_ms() -> u64 {
    DEFAULT_WARMUP_MS
}

fn validate_nonempty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty")
    }
    Ok(())
}
