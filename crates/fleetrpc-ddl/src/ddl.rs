//! The DDL contract model and its builder.
//!
//! A [`Ddl`] describes one plugin: its metadata, and for agents the actions
//! it exposes with their inputs, outputs, display preference and client-side
//! aggregate functions. Contracts are built once at plugin load time, either
//! through [`Ddl::action`] or from a TOML document (see
//! [`crate::document`]), and are read-only afterwards.

use crate::error::DdlError;
use crate::validator::{self, TypeTag, ValidationRule, Validator};
use fleetrpc_types::{Capability, PluginKind, RunMode, RuntimeConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Agent timeout used when the metadata does not declare one.
pub const DEFAULT_AGENT_TIMEOUT: u64 = 10;

/// Plugin metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub version: String,
    pub url: String,
    /// Agent timeout in seconds, or discovery timeout for discovery plugins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// When a client should display an action's replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayPreference {
    /// Only successful replies.
    Ok,
    /// Only failed replies.
    #[default]
    Failed,
    /// Deprecated. Display everything as a flat list.
    Flatten,
    /// Every reply.
    Always,
}

/// The declared type of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Integer,
    Float,
    Number,
    Boolean,
    /// One of a fixed list of values.
    List,
    Hash,
    Array,
    /// Accepts any value.
    Any,
}

impl InputType {
    fn type_tag(self) -> Option<TypeTag> {
        match self {
            InputType::String => Some(TypeTag::String),
            InputType::Integer => Some(TypeTag::Integer),
            InputType::Float => Some(TypeTag::Float),
            InputType::Number => Some(TypeTag::Number),
            InputType::Boolean => Some(TypeTag::Boolean),
            InputType::Hash => Some(TypeTag::Hash),
            InputType::Array => Some(TypeTag::Array),
            InputType::List | InputType::Any => None,
        }
    }
}

/// The name an input was declared under.
///
/// Inputs may be declared by their plain name (`fact`) or by the symbol
/// alias (`:fact`). Both refer to the same canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputKey {
    name: String,
    symbol: bool,
}

impl InputKey {
    /// Parses a declared key, recognising the `:name` symbol form.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(':') {
            Some(name) => Self {
                name: name.to_string(),
                symbol: true,
            },
            None => Self {
                name: raw.to_string(),
                symbol: false,
            },
        }
    }

    /// The canonical name, without any symbol marker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the key was declared in symbol form.
    pub fn is_symbol(&self) -> bool {
        self.symbol
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symbol {
            write!(f, ":{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Properties supplied when declaring an input.
///
/// `optional` is deliberately an `Option`: declaring an input without
/// stating whether it is optional is a declaration error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputProperties {
    pub prompt: String,
    pub description: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
    #[serde(default)]
    pub optional: Option<bool>,
    #[serde(default)]
    pub maxlength: Option<usize>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub list: Option<Vec<Value>>,
}

impl InputProperties {
    pub fn new(prompt: &str, description: &str, input_type: InputType) -> Self {
        Self {
            prompt: prompt.to_string(),
            description: description.to_string(),
            input_type,
            validation: None,
            optional: None,
            maxlength: None,
            default: None,
            list: None,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    pub fn validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    pub fn maxlength(mut self, maxlength: usize) -> Self {
        self.maxlength = Some(maxlength);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn list(mut self, items: Vec<Value>) -> Self {
        self.list = Some(items);
        self
    }
}

/// A declared input after the declaration checks passed.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub key: InputKey,
    pub prompt: String,
    pub description: String,
    pub input_type: InputType,
    pub validation: Option<ValidationRule>,
    pub optional: bool,
    /// Maximum string length, `0` for unlimited.
    pub maxlength: usize,
    pub default: Option<Value>,
    pub list: Vec<Value>,
    /// Set when the key was declared under both its plain and symbol form.
    pub aliased: bool,
}

/// A declared output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub description: String,
    pub display_as: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl OutputSpec {
    pub fn new(description: &str, display_as: &str) -> Self {
        Self {
            description: description.to_string(),
            display_as: display_as.to_string(),
            default: None,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A reference to an aggregate function with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateCall {
    pub function: String,
    pub args: Vec<Value>,
}

/// An aggregate function attached to an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateFunction {
    pub function: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Everything declared about one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub action: String,
    pub description: String,
    pub display: DisplayPreference,
    /// Inputs keyed by canonical name.
    pub input: BTreeMap<String, InputSpec>,
    pub output: BTreeMap<String, OutputSpec>,
    pub aggregate: Vec<AggregateFunction>,
}

impl ActionSpec {
    fn new(action: &str, description: &str) -> Self {
        Self {
            action: action.to_string(),
            description: description.to_string(),
            display: DisplayPreference::default(),
            input: BTreeMap::new(),
            output: BTreeMap::new(),
            aggregate: Vec::new(),
        }
    }
}

/// Knows which aggregate function plugins exist.
pub trait AggregateRegistry: Send + Sync {
    fn contains(&self, name: &str) -> bool;
}

/// The aggregate functions shipped with fleetrpc.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAggregates;

impl AggregateRegistry for BuiltinAggregates {
    fn contains(&self, name: &str) -> bool {
        matches!(name, "summary" | "average" | "sum")
    }
}

/// A plugin's contract.
pub struct Ddl {
    plugin_name: String,
    kind: PluginKind,
    mode: RunMode,
    meta: Metadata,
    entities: BTreeMap<String, ActionSpec>,
    capabilities: Vec<Capability>,
    validator: Arc<Validator>,
    aggregates: Arc<dyn AggregateRegistry>,
}

impl fmt::Debug for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ddl")
            .field("plugin_name", &self.plugin_name)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("meta", &self.meta)
            .field("actions", &self.entities.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Ddl {
    /// Creates an empty contract using the built-in validators and
    /// aggregate functions.
    pub fn new(plugin_name: &str, kind: PluginKind, mode: RunMode) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            kind,
            mode,
            meta: Metadata::default(),
            entities: BTreeMap::new(),
            capabilities: Vec::new(),
            validator: Arc::new(Validator::builtin()),
            aggregates: Arc::new(BuiltinAggregates),
        }
    }

    /// Uses a shared validator, so plugin lookups share one cache.
    pub fn with_validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_aggregates(mut self, aggregates: Arc<dyn AggregateRegistry>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn metadata(&mut self, meta: Metadata) {
        self.meta = meta;
    }

    /// Declares the filter capabilities of a discovery plugin.
    pub fn capabilities(&mut self, capabilities: Vec<Capability>) -> Result<(), DdlError> {
        if self.kind != PluginKind::Discovery {
            return Err(DdlError::Declaration(format!(
                "capabilities can only be declared for discovery plugins, {} is a {} plugin",
                self.plugin_name, self.kind
            )));
        }
        self.capabilities = capabilities;
        Ok(())
    }

    /// Declares an action and runs `block` to declare its interface.
    ///
    /// Declaring an existing action again keeps the first description and
    /// runs the block against the existing entry.
    pub fn action<F>(&mut self, name: &str, description: Option<&str>, block: F) -> Result<(), DdlError>
    where
        F: FnOnce(&mut ActionBuilder<'_>) -> Result<(), DdlError>,
    {
        let description = description
            .ok_or_else(|| DdlError::Declaration("Action needs a :description property".to_string()))?;

        let spec = self
            .entities
            .entry(name.to_string())
            .or_insert_with(|| ActionSpec::new(name, description));

        let mut builder = ActionBuilder {
            spec,
            plugin_name: &self.plugin_name,
            mode: self.mode,
            aggregates: self.aggregates.as_ref(),
        };
        block(&mut builder)
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    pub fn discovery_capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// The agent timeout in seconds.
    pub fn timeout(&self) -> u64 {
        self.meta.timeout.unwrap_or(DEFAULT_AGENT_TIMEOUT)
    }

    pub fn action_interface(&self, name: &str) -> Option<&ActionSpec> {
        self.entities.get(name)
    }

    /// Names of every declared action.
    pub fn actions(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    /// Canonical names of an action's inputs.
    pub fn input_keys(&self, action: &str) -> Vec<&str> {
        self.entities
            .get(action)
            .map(|spec| spec.input.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether clients may use this plugin, from the
    /// `<plugin>.activate_client` setting.
    pub fn client_activated(&self, config: &RuntimeConfig) -> bool {
        config
            .plugin_flag(&format!("{}.activate_client", self.plugin_name))
            .unwrap_or(true)
    }

    /// Maps incoming argument keys to canonical input names.
    ///
    /// A `:name` key becomes `name` when `name` is a declared input. When
    /// both forms of the same key arrive, the plain string form wins and
    /// one warning is logged.
    pub fn reconcile_keys(&self, action: &str, arguments: &Map<String, Value>) -> Map<String, Value> {
        self.canonical_keys(action, arguments, true)
    }

    fn canonical_keys(&self, action: &str, arguments: &Map<String, Value>, report: bool) -> Map<String, Value> {
        let inputs = self.entities.get(action).map(|spec| &spec.input);
        let mut warned = !report;
        let mut reconciled = Map::new();

        for (key, value) in arguments {
            let canonical = match (key.strip_prefix(':'), inputs) {
                (Some(name), Some(inputs)) if inputs.contains_key(name) => name,
                _ => key.as_str(),
            };

            if canonical != key.as_str() && arguments.contains_key(canonical) {
                if !warned {
                    tracing::warn!(
                        plugin = %self.plugin_name,
                        action = %action,
                        input = %canonical,
                        "string and symbol versions of an input found, using the string version"
                    );
                    warned = true;
                }
                continue;
            }
            reconciled.insert(canonical.to_string(), value.clone());
        }

        reconciled
    }

    /// Checks that a call to `action` with `arguments` honours the contract.
    pub fn validate_rpc_request(&self, action: &str, arguments: &Map<String, Value>) -> Result<(), DdlError> {
        let spec = self.entities.get(action).ok_or_else(|| {
            DdlError::Validation(format!(
                "Attempted to call action {} for {} but it's not declared in the DDL",
                action, self.plugin_name
            ))
        })?;

        let arguments = self.canonical_keys(action, arguments, false);

        for (name, input) in &spec.input {
            match arguments.get(name) {
                Some(value) => self.validate_input_argument(input, value)?,
                None if !input.optional => {
                    return Err(DdlError::Validation(format!(
                        "Action {} needs a {} argument",
                        action, name
                    )));
                }
                None => {}
            }
        }

        Ok(())
    }

    /// Validates one argument against its declared input.
    pub fn validate_input_argument(&self, input: &InputSpec, value: &Value) -> Result<(), DdlError> {
        let checked = match input.input_type {
            InputType::String => validator::typecheck(value, TypeTag::String)
                .and_then(|_| validator::length(value, input.maxlength))
                .and_then(|_| match &input.validation {
                    Some(rule) => self.validator.validate(value, rule),
                    None => Ok(()),
                }),
            InputType::List => self
                .validator
                .validate(value, &ValidationRule::OneOf(input.list.clone())),
            other => match other.type_tag() {
                Some(tag) => validator::typecheck(value, tag),
                None => Ok(()),
            },
        };

        checked.map_err(|e| {
            DdlError::Validation(format!("Cannot validate input {}: {}", input.key.name(), e))
        })
    }

    /// Fills declared defaults for required inputs the caller left out.
    ///
    /// Only clients fill defaults. On a server this does nothing, so a
    /// request that skipped client-side validation still fails.
    pub fn set_default_input_arguments(&self, action: &str, arguments: &mut Map<String, Value>) {
        if self.mode != RunMode::Client {
            return;
        }
        let Some(spec) = self.entities.get(action) else {
            return;
        };

        for (name, input) in &spec.input {
            let symbol_form = format!(":{}", name);
            if input.optional || arguments.contains_key(name) || arguments.contains_key(&symbol_form) {
                continue;
            }
            if let Some(default) = &input.default {
                tracing::debug!(input = %name, default = %default, "setting default value for input");
                arguments.insert(name.clone(), default.clone());
            }
        }
    }
}

/// Declares the interface of one action. Handed to the block passed to
/// [`Ddl::action`].
pub struct ActionBuilder<'a> {
    spec: &'a mut ActionSpec,
    plugin_name: &'a str,
    mode: RunMode,
    aggregates: &'a dyn AggregateRegistry,
}

impl ActionBuilder<'_> {
    pub fn action_name(&self) -> &str {
        &self.spec.action
    }

    pub fn display(&mut self, pref: DisplayPreference) {
        if pref == DisplayPreference::Flatten {
            tracing::warn!(
                plugin = %self.plugin_name,
                action = %self.spec.action,
                "the display option flatten is deprecated"
            );
        }
        self.spec.display = pref;
    }

    /// Declares an input. `properties.optional` must be set.
    pub fn input(&mut self, key: &str, properties: InputProperties) -> Result<(), DdlError> {
        let optional = properties
            .optional
            .ok_or_else(|| DdlError::Declaration("Input needs a :optional property".to_string()))?;

        let key = InputKey::parse(key);

        match properties.input_type {
            InputType::String => {
                if properties.validation.is_none() {
                    return Err(DdlError::Declaration(
                        "Input type :string needs a :validation argument".to_string(),
                    ));
                }
                if properties.maxlength.is_none() {
                    return Err(DdlError::Declaration(
                        "Input type :string needs a :maxlength argument".to_string(),
                    ));
                }
            }
            InputType::List if properties.list.is_none() => {
                return Err(DdlError::Declaration(
                    "Input type :list needs a :list argument".to_string(),
                ));
            }
            _ => {}
        }

        let previous = self.spec.input.get(key.name());
        let aliased = previous.is_some_and(|p| p.key.is_symbol() != key.is_symbol() || p.aliased);
        if previous.is_some_and(|p| p.key.is_symbol() != key.is_symbol() && !p.aliased) {
            tracing::warn!(
                plugin = %self.plugin_name,
                action = %self.spec.action,
                input = %key.name(),
                "string and symbol versions of an input declared, using the string version"
            );
        }
        if previous.is_some_and(|p| !p.key.is_symbol()) && key.is_symbol() {
            // The plain string declaration stays authoritative.
            if let Some(existing) = self.spec.input.get_mut(key.name()) {
                existing.aliased = true;
            }
            return Ok(());
        }

        let spec = InputSpec {
            key: key.clone(),
            prompt: properties.prompt,
            description: properties.description,
            input_type: properties.input_type,
            validation: properties.validation,
            optional,
            maxlength: properties.maxlength.unwrap_or(0),
            default: properties.default,
            list: properties.list.unwrap_or_default(),
            aliased,
        };
        self.spec.input.insert(key.name().to_string(), spec);
        Ok(())
    }

    pub fn output(&mut self, name: &str, properties: OutputSpec) {
        self.spec.output.insert(name.to_string(), properties);
    }

    /// Runs `block` to declare aggregate functions. Only clients run it.
    pub fn summarize<F>(&mut self, block: F) -> Result<(), DdlError>
    where
        F: FnOnce(&mut SummarizeBuilder<'_>) -> Result<(), DdlError>,
    {
        if self.mode != RunMode::Client {
            return Ok(());
        }
        let mut summarize = SummarizeBuilder {
            spec: &mut *self.spec,
        };
        block(&mut summarize)
    }

    /// References an aggregate function outside a summarize block. Only
    /// registered aggregate plugins are accepted.
    pub fn function(&self, name: &str, args: Vec<Value>) -> Result<AggregateCall, DdlError> {
        if !self.aggregates.contains(name) {
            return Err(DdlError::Declaration(format!(
                "unknown function '{}' in action '{}' of {}",
                name, self.spec.action, self.plugin_name
            )));
        }
        Ok(AggregateCall {
            function: name.to_string(),
            args,
        })
    }

    pub fn aggregate(&mut self, call: AggregateCall, format: Option<&str>) -> Result<(), DdlError> {
        push_aggregate(self.spec, call, format)
    }
}

/// Declares aggregate functions inside [`ActionBuilder::summarize`].
pub struct SummarizeBuilder<'a> {
    spec: &'a mut ActionSpec,
}

impl SummarizeBuilder<'_> {
    /// References an aggregate function by name. Any name is accepted
    /// here; it is resolved against the aggregate plugins when results
    /// are summarised.
    pub fn function(&self, name: &str, args: Vec<Value>) -> AggregateCall {
        AggregateCall {
            function: name.to_string(),
            args,
        }
    }

    pub fn aggregate(&mut self, call: AggregateCall, format: Option<&str>) -> Result<(), DdlError> {
        push_aggregate(self.spec, call, format)
    }
}

fn push_aggregate(spec: &mut ActionSpec, call: AggregateCall, format: Option<&str>) -> Result<(), DdlError> {
    if call.args.is_empty() {
        return Err(DdlError::Validation(format!(
            "aggregate method for action '{}' missing a function parameter",
            spec.action
        )));
    }
    spec.aggregate.push(AggregateFunction {
        function: call.function,
        args: call.args,
        format: format.map(str::to_string),
    });
    Ok(())
}
