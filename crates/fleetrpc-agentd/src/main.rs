//! fleetrpc agent daemon binary.
//!
//! Loads configuration, initialises tracing and checks that every agent DDL
//! in the configured directory loads. Exits non-zero when any fails.

use fleetrpc_agentd::{check_ddl_dir, load_config, resolve_config_path, telemetry, RpcutilAgent};
use std::process::ExitCode;

fn main() -> ExitCode {
    let (config_path, config_source) = resolve_config_path(std::env::args().nth(1), |key| std::env::var(key).ok());

    let config = match load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    telemetry::init_tracing(&config.logging);

    tracing::info!(
        source = config_source.as_str(),
        path = %config_path,
        identity = %config.runtime.identity,
        collective = %config.runtime.main_collective,
        "resolved startup configuration path"
    );

    if let Err(e) = RpcutilAgent::new(Vec::new(), &config.runtime) {
        tracing::error!("built-in rpcutil DDL failed to load: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match check_ddl_dir(&config.plugins.ddl_dir) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(
                dir = %config.plugins.ddl_dir.display(),
                "failed to read DDL directory: {}",
                e
            );
            return ExitCode::FAILURE;
        }
    };

    if !report.is_ok() {
        tracing::error!(failed = report.failures.len(), "preflight failed");
        return ExitCode::FAILURE;
    }

    tracing::info!(agents = ?report.agents(), "preflight passed");
    ExitCode::SUCCESS
}
