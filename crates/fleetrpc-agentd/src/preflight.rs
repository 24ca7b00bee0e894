//! Startup check of the agent DDL directory.

use fleetrpc_ddl::{Ddl, DdlError, DdlLoader};
use fleetrpc_types::{PluginKind, RunMode};
use std::path::{Path, PathBuf};

/// Outcome of loading every DDL in a directory.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub loaded: Vec<Ddl>,
    pub failures: Vec<(PathBuf, DdlError)>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the agents that loaded.
    pub fn agents(&self) -> Vec<&str> {
        self.loaded.iter().map(Ddl::plugin_name).collect()
    }
}

/// Loads every `*.toml` file in `dir` as an agent DDL in server mode.
///
/// Files are loaded in name order and share one validator.
///
/// # Errors
///
/// Returns an error only if the directory cannot be listed. Per-file
/// failures are collected in the report.
pub fn check_ddl_dir(dir: &Path) -> std::io::Result<PreflightReport> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let loader = DdlLoader::new(RunMode::Server);
    let mut report = PreflightReport::default();

    for path in paths {
        match loader.load_file(&path, PluginKind::Agent) {
            Ok(ddl) => {
                tracing::info!(
                    agent = %ddl.plugin_name(),
                    actions = ?ddl.actions(),
                    path = %path.display(),
                    "loaded agent DDL"
                );
                report.loaded.push(ddl);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "failed to load agent DDL: {}", e);
                report.failures.push((path, e));
            }
        }
    }

    Ok(report)
}
