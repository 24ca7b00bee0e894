//! Declarative DDL documents.
//!
//! A DDL file is TOML:
//!
//! ```toml
//! [metadata]
//! name = "rpcutil"
//! description = "General helpful actions"
//! author = "ops"
//! license = "Apache-2.0"
//! version = "1.0"
//! url = "https://example.net"
//! timeout = 10
//!
//! [[action]]
//! name = "get_fact"
//! description = "Retrieve a single fact"
//! display = "always"
//!
//! [action.input.fact]
//! prompt = "Fact"
//! description = "The fact to retrieve"
//! type = "string"
//! validation = '^[\w\-\.]+$'
//! optional = false
//! maxlength = 40
//!
//! [action.output.value]
//! description = "The value of the fact"
//! display_as = "Value"
//!
//! [[action.summarize]]
//! function = "summary"
//! args = ["value"]
//! ```
//!
//! Documents are fed through the same builder as programmatic declarations,
//! so every declaration check applies. Unknown keys are rejected.

use crate::ddl::{AggregateRegistry, BuiltinAggregates, Ddl, DisplayPreference, InputProperties, Metadata, OutputSpec};
use crate::error::DdlError;
use crate::validator::Validator;
use fleetrpc_types::{Capability, PluginKind, RunMode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DdlDocument {
    metadata: Metadata,
    #[serde(default)]
    action: Vec<ActionDocument>,
    #[serde(default)]
    discovery: Option<DiscoveryDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionDocument {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display: Option<DisplayPreference>,
    #[serde(default)]
    input: BTreeMap<String, InputProperties>,
    #[serde(default)]
    output: BTreeMap<String, OutputSpec>,
    #[serde(default)]
    summarize: Vec<AggregateDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AggregateDocument {
    function: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiscoveryDocument {
    capabilities: Vec<Capability>,
}

/// Loads DDL documents with a shared validator and aggregate registry.
#[derive(Clone)]
pub struct DdlLoader {
    mode: RunMode,
    validator: Arc<Validator>,
    aggregates: Arc<dyn AggregateRegistry>,
}

impl DdlLoader {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            validator: Arc::new(Validator::builtin()),
            aggregates: Arc::new(BuiltinAggregates),
        }
    }

    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_aggregates(mut self, aggregates: Arc<dyn AggregateRegistry>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// Parses a document for the plugin `plugin_name`.
    pub fn load_str(&self, plugin_name: &str, kind: PluginKind, source: &str) -> Result<Ddl, DdlError> {
        let document: DdlDocument = toml::from_str(source)?;

        let mut ddl = Ddl::new(plugin_name, kind, self.mode)
            .with_validator(Arc::clone(&self.validator))
            .with_aggregates(Arc::clone(&self.aggregates));
        ddl.metadata(document.metadata);

        if let Some(discovery) = document.discovery {
            ddl.capabilities(discovery.capabilities)?;
        }

        for action in document.action {
            let ActionDocument {
                name,
                description,
                display,
                input,
                output,
                summarize,
            } = action;

            ddl.action(&name, description.as_deref(), |a| {
                if let Some(pref) = display {
                    a.display(pref);
                }
                for (key, properties) in input {
                    a.input(&key, properties)?;
                }
                for (key, properties) in output {
                    a.output(&key, properties);
                }
                a.summarize(|s| {
                    for entry in summarize {
                        let call = s.function(&entry.function, entry.args);
                        s.aggregate(call, entry.format.as_deref())?;
                    }
                    Ok(())
                })
            })?;
        }

        tracing::debug!(
            plugin = %plugin_name,
            kind = %kind,
            actions = ddl.actions().len(),
            "loaded DDL"
        );
        Ok(ddl)
    }

    /// Reads and parses a DDL file. The plugin name is the file stem.
    pub fn load_file(&self, path: &Path, kind: PluginKind) -> Result<Ddl, DdlError> {
        let plugin_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                DdlError::Declaration(format!("cannot derive a plugin name from {}", path.display()))
            })?
            .to_string();
        let source = std::fs::read_to_string(path)?;
        self.load_str(&plugin_name, kind, &source)
    }
}

impl Ddl {
    /// Parses a DDL document with the built-in validators and aggregates.
    pub fn from_toml_str(plugin_name: &str, kind: PluginKind, mode: RunMode, source: &str) -> Result<Ddl, DdlError> {
        DdlLoader::new(mode).load_str(plugin_name, kind, source)
    }

    /// Reads a DDL file with the built-in validators and aggregates.
    pub fn load_file(path: &Path, kind: PluginKind, mode: RunMode) -> Result<Ddl, DdlError> {
        DdlLoader::new(mode).load_file(path, kind)
    }
}
