//! The fleetrpc agent daemon: configuration, tracing setup, the agent host
//! and the built-in `rpcutil` agent.

pub mod config;
pub mod host;
pub mod preflight;
pub mod rpcutil;
pub mod telemetry;

pub use config::{load_config, resolve_config_path, Config, ConfigError, ConfigSource, DEFAULT_CONFIG_PATH};
pub use host::{AgentHost, Disposition, HostError};
pub use preflight::{check_ddl_dir, PreflightReport};
pub use rpcutil::{inventory_entry, RpcutilAgent, RPCUTIL};
