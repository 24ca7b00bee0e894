//! The immutable runtime configuration handed to messages, discovery and
//! the dispatcher.

use crate::RunMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_identity() -> String {
    "localhost".to_string()
}

fn default_collective() -> String {
    "fleetrpc".to_string()
}

fn default_ttl() -> u64 {
    60
}

fn default_direct_addressing() -> bool {
    true
}

fn default_direct_addressing_threshold() -> usize {
    10
}

fn default_discovery_method() -> String {
    "mc".to_string()
}

fn default_discovery_timeout() -> u64 {
    2
}

fn default_activate_agents() -> bool {
    true
}

/// Runtime settings read by the protocol core.
///
/// Constructed once (usually by the daemon's config loader) and passed to
/// constructors. Nothing in the core mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// This node's identity, used as the sender of requests.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// The collective requests target when none is given.
    #[serde(default = "default_collective")]
    pub main_collective: String,

    /// Every collective this node belongs to.
    #[serde(default)]
    pub collectives: Vec<String>,

    /// Default request time-to-live in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,

    /// Whether point-to-point addressing of discovered hosts is allowed.
    #[serde(default = "default_direct_addressing")]
    pub direct_addressing: bool,

    /// Largest discovered host count still sent as a direct request.
    #[serde(default = "default_direct_addressing_threshold")]
    pub direct_addressing_threshold: usize,

    /// Discovery method used when a client does not pick one.
    #[serde(default = "default_discovery_method")]
    pub default_discovery_method: String,

    /// Discovery timeout in seconds when neither the caller nor the
    /// method's DDL gives one.
    #[serde(default = "default_discovery_timeout")]
    pub default_discovery_timeout: u64,

    /// Whether this process runs as a server or a client.
    #[serde(default)]
    pub mode: RunMode,

    /// Global default for agent activation.
    #[serde(default = "default_activate_agents")]
    pub activate_agents: bool,

    /// Free-form per-plugin settings such as `rpcutil.activate_agent`.
    #[serde(default)]
    pub plugin_conf: BTreeMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            main_collective: default_collective(),
            collectives: Vec::new(),
            ttl: default_ttl(),
            direct_addressing: default_direct_addressing(),
            direct_addressing_threshold: default_direct_addressing_threshold(),
            default_discovery_method: default_discovery_method(),
            default_discovery_timeout: default_discovery_timeout(),
            mode: RunMode::default(),
            activate_agents: default_activate_agents(),
            plugin_conf: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Reads a boolean plugin setting.
    ///
    /// Returns `None` when the key is absent or its value is not a
    /// recognised boolean spelling.
    pub fn plugin_flag(&self, key: &str) -> Option<bool> {
        self.plugin_conf.get(key).and_then(|v| str_to_bool(v))
    }
}

/// Parses the boolean spellings accepted in configuration files.
///
/// `1`, `yes`, `true`, `y` and `t` are true; `0`, `no`, `false`, `n` and
/// `f` are false (case-insensitive). Anything else is `None`.
pub fn str_to_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "y" | "t" => Some(true),
        "0" | "no" | "false" | "n" | "f" => Some(false),
        _ => None,
    }
}
