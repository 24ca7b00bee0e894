//! Daemon configuration loading from file and environment variables.

use fleetrpc_types::{str_to_bool, RuntimeConfig};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Settings handed to messages, discovery and the agent host.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugin locations.
    #[serde(default)]
    pub plugins: PluginsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "fleetrpc_rpc=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Directory holding agent DDL files (`*.toml`).
    #[serde(default = "default_ddl_dir")]
    pub ddl_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ddl_dir() -> PathBuf {
    PathBuf::from("ddl")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            ddl_dir: default_ddl_dir(),
        }
    }
}

/// Config file used when neither the command line nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "fleetrpc.toml";

/// Where the config file path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CliArg,
    EnvVar,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::CliArg => "cli-arg",
            ConfigSource::EnvVar => "env-var",
            ConfigSource::Default => "default",
        }
    }
}

/// Picks the config file path: the first command-line argument, then
/// `FLEETRPC_CONFIG_PATH`, then [`DEFAULT_CONFIG_PATH`]. Blank values are
/// skipped.
pub fn resolve_config_path<F>(arg: Option<String>, lookup: F) -> (String, ConfigSource)
where
    F: Fn(&str) -> Option<String>,
{
    let present = |value: &String| !value.trim().is_empty();

    if let Some(path) = arg.filter(present) {
        return (path, ConfigSource::CliArg);
    }
    if let Some(path) = lookup("FLEETRPC_CONFIG_PATH").filter(present) {
        return (path, ConfigSource::EnvVar);
    }
    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `FLEETRPC_IDENTITY` overrides `runtime.identity`
/// - `FLEETRPC_COLLECTIVE` overrides `runtime.main_collective`
/// - `FLEETRPC_TTL` overrides `runtime.ttl`
/// - `FLEETRPC_DIRECT_ADDRESSING` overrides `runtime.direct_addressing`
/// - `FLEETRPC_LOG_LEVEL` overrides `logging.level`
/// - `FLEETRPC_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `FLEETRPC_DDL_DIR` overrides `plugins.ddl_dir`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `FLEETRPC_*` overrides read through `lookup`. Unparseable
/// values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(identity) = lookup("FLEETRPC_IDENTITY") {
        config.runtime.identity = identity;
    }
    if let Some(collective) = lookup("FLEETRPC_COLLECTIVE") {
        config.runtime.main_collective = collective;
    }
    if let Some(ttl) = lookup("FLEETRPC_TTL") {
        if let Ok(parsed) = ttl.parse() {
            config.runtime.ttl = parsed;
        }
    }
    if let Some(direct) = lookup("FLEETRPC_DIRECT_ADDRESSING") {
        if let Some(parsed) = str_to_bool(&direct) {
            config.runtime.direct_addressing = parsed;
        }
    }
    if let Some(level) = lookup("FLEETRPC_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("FLEETRPC_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(dir) = lookup("FLEETRPC_DDL_DIR") {
        config.plugins.ddl_dir = PathBuf::from(dir);
    }
}
