//! Generic value validation with pluggable named validators.
//!
//! A [`ValidationRule`] says how a value is checked: a structural type tag,
//! a regular expression, membership in a list, or a named
//! [`ValidatorPlugin`]. Plugins come from a [`ValidatorRegistry`] and are
//! held in a [`ValidatorCache`] that reloads the registry at most once every
//! [`VALIDATOR_REFRESH_SECS`] seconds.
//!
//! The cache is the one piece of state shared between concurrent requests.
//! It swaps in a whole new plugin table under its lock, so a validation in
//! progress keeps using the table it started with.

use crate::error::ValidatorError;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

/// Minimum number of seconds between two plugin table reloads.
pub const VALIDATOR_REFRESH_SECS: i64 = 300;

/// Structural type tags understood by the type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Integer,
    Boolean,
    Float,
    Number,
    String,
    Array,
    Hash,
}

impl TypeTag {
    /// Parses a tag name such as `integer` or `hash`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "float" => Some(Self::Float),
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "array" => Some(Self::Array),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    /// Returns the tag name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Float => "float",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Hash => "hash",
        }
    }

    /// Returns `true` if `value` has this structural type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Float => value.is_f64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Hash => value.is_object(),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a value is validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    /// Structural type check.
    Type(TypeTag),
    /// The value must be a string matching this pattern.
    Regex(String),
    /// Dispatch to the named validator plugin.
    Plugin(String),
    /// The value must equal one of these entries.
    OneOf(Vec<Value>),
}

impl ValidationRule {
    /// Parses the textual rule notation used in DDL documents.
    ///
    /// A leading `:` marks a symbol: `:integer` is a type check and any other
    /// symbol such as `:shellsafe` names a plugin. Anything else is a regular
    /// expression.
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix(':') {
            Some(symbol) => match TypeTag::parse(symbol) {
                Some(tag) => Self::Type(tag),
                None => Self::Plugin(symbol.to_string()),
            },
            None => Self::Regex(text.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ValidationRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawRule {
            Text(String),
            List(Vec<Value>),
        }

        Ok(match RawRule::deserialize(deserializer)? {
            RawRule::Text(text) => ValidationRule::parse(&text),
            RawRule::List(items) => ValidationRule::OneOf(items),
        })
    }
}

/// A named validator.
pub trait ValidatorPlugin: Send + Sync {
    /// The plugin name, e.g. `shellsafe`.
    fn name(&self) -> &str;

    /// Checks a value, returning a human-readable reason on failure.
    fn validate(&self, value: &Value) -> Result<(), String>;
}

/// Source of validator plugins.
pub trait ValidatorRegistry: Send + Sync {
    /// Finds and loads every available validator plugin.
    fn find_and_load(&self) -> Vec<Arc<dyn ValidatorPlugin>>;
}

/// Normalises a validator name so that `ipv4address`, `Ipv4address` and
/// `Ipv4addressValidator` all refer to the same plugin.
pub fn plugin_key(name: &str) -> String {
    name.strip_suffix("Validator")
        .unwrap_or(name)
        .to_ascii_lowercase()
}

type PluginTable = Arc<HashMap<String, Arc<dyn ValidatorPlugin>>>;

struct CacheState {
    last_refresh: Option<i64>,
    table: PluginTable,
}

/// Time-bounded cache of the validator plugin table.
pub struct ValidatorCache {
    state: Mutex<CacheState>,
}

impl ValidatorCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                last_refresh: None,
                table: Arc::new(HashMap::new()),
            }),
        }
    }

    /// Returns the current plugin table, reloading it from `registry` first
    /// when it has never been loaded or is older than
    /// [`VALIDATOR_REFRESH_SECS`].
    pub fn get_or_refresh(
        &self,
        registry: &dyn ValidatorRegistry,
        now: i64,
    ) -> Arc<HashMap<String, Arc<dyn ValidatorPlugin>>> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A stale table only means a plugin may be missed, so keep going.
                tracing::error!("validator cache lock poisoned, recovering with stale table");
                poisoned.into_inner()
            }
        };

        let stale = match state.last_refresh {
            None => true,
            Some(last) => now - last > VALIDATOR_REFRESH_SECS,
        };

        if stale {
            let table: HashMap<_, _> = registry
                .find_and_load()
                .into_iter()
                .map(|plugin| (plugin_key(plugin.name()), plugin))
                .collect();
            tracing::debug!(count = table.len(), "loaded validator plugins");
            state.table = Arc::new(table);
            state.last_refresh = Some(now);
        }

        Arc::clone(&state.table)
    }

    /// Returns the time of the last reload, if any.
    pub fn last_refresh(&self) -> Option<i64> {
        match self.state.lock() {
            Ok(guard) => guard.last_refresh,
            Err(poisoned) => poisoned.into_inner().last_refresh,
        }
    }
}

impl Default for ValidatorCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiled regular expressions by pattern text.
///
/// Patterns come from DDL declarations, so the set is small and bounded by
/// the loaded contracts.
#[derive(Default)]
pub struct PatternCache {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled form of `pattern`, compiling it on first use.
    pub fn compile(&self, pattern: &str) -> Result<Regex, ValidatorError> {
        let mut compiled = match self.compiled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("pattern cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };

        if let Some(re) = compiled.get(pattern) {
            return Ok(re.clone());
        }

        let re = Regex::new(pattern).map_err(|e| ValidatorError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        compiled.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    /// Number of compiled patterns held.
    pub fn len(&self) -> usize {
        match self.compiled.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validation dispatch over type checks, patterns, lists and plugins.
pub struct Validator {
    registry: Arc<dyn ValidatorRegistry>,
    cache: ValidatorCache,
    patterns: PatternCache,
}

impl Validator {
    /// Creates a validator backed by `registry`.
    pub fn new(registry: Arc<dyn ValidatorRegistry>) -> Self {
        Self {
            registry,
            cache: ValidatorCache::new(),
            patterns: PatternCache::new(),
        }
    }

    /// Creates a validator with only the built-in plugins.
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinValidators))
    }

    /// Validates `value` against `rule` using the current time for cache
    /// staleness.
    pub fn validate(&self, value: &Value, rule: &ValidationRule) -> Result<(), ValidatorError> {
        self.validate_at(value, rule, chrono::Utc::now().timestamp())
    }

    /// Validates `value` against `rule`, treating `now` as the current time.
    pub fn validate_at(
        &self,
        value: &Value,
        rule: &ValidationRule,
        now: i64,
    ) -> Result<(), ValidatorError> {
        match rule {
            ValidationRule::Type(tag) => typecheck(value, *tag),
            ValidationRule::Regex(pattern) => {
                let re = self.patterns.compile(pattern)?;
                regex_match(value, &re, pattern)
            }
            ValidationRule::OneOf(items) => one_of(value, items),
            ValidationRule::Plugin(name) => {
                let table = self.cache.get_or_refresh(self.registry.as_ref(), now);
                let plugin = table
                    .get(&plugin_key(name))
                    .ok_or_else(|| ValidatorError::UnknownValidator(name.clone()))?;
                plugin.validate(value).map_err(ValidatorError::Plugin)
            }
        }
    }

    /// Returns `true` if a plugin with this name is currently loaded.
    pub fn has_validator(&self, name: &str) -> bool {
        let table = self
            .cache
            .get_or_refresh(self.registry.as_ref(), chrono::Utc::now().timestamp());
        table.contains_key(&plugin_key(name))
    }

    /// Exposes the plugin cache.
    pub fn cache(&self) -> &ValidatorCache {
        &self.cache
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("last_refresh", &self.cache.last_refresh())
            .finish()
    }
}

/// Structural type check.
pub fn typecheck(value: &Value, tag: TypeTag) -> Result<(), ValidatorError> {
    if tag.matches(value) {
        Ok(())
    } else {
        Err(ValidatorError::TypeMismatch {
            expected: tag.name().to_string(),
        })
    }
}

/// The value must be a string matching `pattern`.
///
/// Compiles `pattern` on every call; [`Validator`] keeps compiled patterns
/// in a [`PatternCache`] instead.
pub fn regex(value: &Value, pattern: &str) -> Result<(), ValidatorError> {
    let re = Regex::new(pattern).map_err(|e| ValidatorError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    regex_match(value, &re, pattern)
}

fn regex_match(value: &Value, re: &Regex, pattern: &str) -> Result<(), ValidatorError> {
    match value.as_str() {
        Some(text) if re.is_match(text) => Ok(()),
        _ => Err(ValidatorError::RegexMismatch(pattern.to_string())),
    }
}

/// The value must equal one of `items`.
pub fn one_of(value: &Value, items: &[Value]) -> Result<(), ValidatorError> {
    if items.contains(value) {
        return Ok(());
    }
    let listed: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Err(ValidatorError::NotInList(listed.join(", ")))
}

/// A string must not be longer than `max` characters. `0` means unlimited.
pub fn length(value: &Value, max: usize) -> Result<(), ValidatorError> {
    match value.as_str() {
        Some(text) if max > 0 && text.chars().count() > max => Err(ValidatorError::TooLong(max)),
        _ => Ok(()),
    }
}

/// Registry of the validators shipped with fleetrpc.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinValidators;

impl ValidatorRegistry for BuiltinValidators {
    fn find_and_load(&self) -> Vec<Arc<dyn ValidatorPlugin>> {
        vec![
            Arc::new(ShellsafeValidator),
            Arc::new(Ipv4AddressValidator),
            Arc::new(Ipv6AddressValidator),
        ]
    }
}

/// Rejects strings containing shell metacharacters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellsafeValidator;

impl ValidatorPlugin for ShellsafeValidator {
    fn name(&self) -> &str {
        "shellsafe"
    }

    fn validate(&self, value: &Value) -> Result<(), String> {
        let text = value
            .as_str()
            .ok_or_else(|| "value should be a string".to_string())?;
        for unsafe_char in ["`", "$", ";", "|", "&&", ">", "<"] {
            if text.contains(unsafe_char) {
                return Err(format!("{} should not have {} in it", text, unsafe_char));
            }
        }
        Ok(())
    }
}

/// Accepts dotted-quad IPv4 addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv4AddressValidator;

impl ValidatorPlugin for Ipv4AddressValidator {
    fn name(&self) -> &str {
        "ipv4address"
    }

    fn validate(&self, value: &Value) -> Result<(), String> {
        match value.as_str().map(str::parse::<Ipv4Addr>) {
            Some(Ok(_)) => Ok(()),
            _ => Err(format!("{} is not an IPv4 address", value)),
        }
    }
}

/// Accepts IPv6 addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv6AddressValidator;

impl ValidatorPlugin for Ipv6AddressValidator {
    fn name(&self) -> &str {
        "ipv6address"
    }

    fn validate(&self, value: &Value) -> Result<(), String> {
        match value.as_str().map(str::parse::<Ipv6Addr>) {
            Some(Ok(_)) => Ok(()),
            _ => Err(format!("{} is not an IPv6 address", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry that counts how often it is asked to load.
    struct CountingRegistry {
        loads: AtomicUsize,
    }

    impl ValidatorRegistry for CountingRegistry {
        fn find_and_load(&self) -> Vec<Arc<dyn ValidatorPlugin>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            BuiltinValidators.find_and_load()
        }
    }

    // -----------------------------------------------------------------------
    // Rule parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_symbol_type_tag() {
        assert_eq!(
            ValidationRule::parse(":integer"),
            ValidationRule::Type(TypeTag::Integer)
        );
    }

    #[test]
    fn parse_symbol_plugin() {
        assert_eq!(
            ValidationRule::parse(":shellsafe"),
            ValidationRule::Plugin("shellsafe".to_string())
        );
    }

    #[test]
    fn parse_plain_string_is_regex() {
        assert_eq!(
            ValidationRule::parse("^[a-z]+$"),
            ValidationRule::Regex("^[a-z]+$".to_string())
        );
    }

    #[test]
    fn deserialize_list_is_one_of() {
        let rule: ValidationRule = serde_json::from_value(json!(["start", "stop"])).unwrap();
        assert_eq!(
            rule,
            ValidationRule::OneOf(vec![json!("start"), json!("stop")])
        );
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[test]
    fn typecheck_rules() {
        let validator = Validator::builtin();
        let integer = ValidationRule::Type(TypeTag::Integer);
        assert!(validator.validate(&json!(1), &integer).is_ok());
        assert!(matches!(
            validator.validate(&json!("1"), &integer),
            Err(ValidatorError::TypeMismatch { ref expected }) if expected == "integer"
        ));

        let number = ValidationRule::Type(TypeTag::Number);
        assert!(validator.validate(&json!(1.5), &number).is_ok());
        assert!(validator.validate(&json!(2), &number).is_ok());

        let float = ValidationRule::Type(TypeTag::Float);
        assert!(validator.validate(&json!(1.5), &float).is_ok());
        assert!(validator.validate(&json!(2), &float).is_err());

        let hash = ValidationRule::Type(TypeTag::Hash);
        assert!(validator.validate(&json!({"a": 1}), &hash).is_ok());
        assert!(validator.validate(&json!([1]), &hash).is_err());

        let boolean = ValidationRule::Type(TypeTag::Boolean);
        assert!(validator.validate(&json!(false), &boolean).is_ok());
    }

    #[test]
    fn regex_rule() {
        let validator = Validator::builtin();
        let rule = ValidationRule::Regex(r"^[\w\-\.]+$".to_string());
        assert!(validator.validate(&json!("fqdn"), &rule).is_ok());
        assert!(validator.validate(&json!("two words"), &rule).is_err());
        assert!(validator.validate(&json!(42), &rule).is_err());
    }

    #[test]
    fn regex_patterns_compile_once() {
        let validator = Validator::builtin();
        let rule = ValidationRule::Regex(r"^[\w\-\.]+$".to_string());
        for value in ["fqdn", "os", "two words"] {
            let _ = validator.validate(&json!(value), &rule);
        }
        assert_eq!(validator.patterns().len(), 1);

        let other = ValidationRule::Regex("^[a-z]+$".to_string());
        assert!(validator.validate(&json!("abc"), &other).is_ok());
        assert_eq!(validator.patterns().len(), 2);
    }

    #[test]
    fn invalid_regex_is_reported() {
        let rule = ValidationRule::Regex("([".to_string());
        let err = Validator::builtin()
            .validate(&json!("x"), &rule)
            .unwrap_err();
        assert!(matches!(err, ValidatorError::InvalidPattern { .. }));
    }

    #[test]
    fn one_of_rule() {
        let validator = Validator::builtin();
        let rule = ValidationRule::OneOf(vec![json!("start"), json!("stop")]);
        assert!(validator.validate(&json!("stop"), &rule).is_ok());
        let err = validator.validate(&json!("restart"), &rule).unwrap_err();
        assert_eq!(err.to_string(), "value should be one of start, stop");
    }

    #[test]
    fn plugin_rule_dispatches_by_normalised_name() {
        let validator = Validator::builtin();
        for name in ["ipv4address", "Ipv4address", "Ipv4addressValidator"] {
            let rule = ValidationRule::Plugin(name.to_string());
            assert!(validator.validate(&json!("10.0.0.1"), &rule).is_ok(), "{name}");
            assert!(validator.validate(&json!("10.0.0"), &rule).is_err(), "{name}");
        }
    }

    #[test]
    fn unknown_plugin_fails() {
        let rule = ValidationRule::Plugin("bogus".to_string());
        let err = Validator::builtin().validate(&json!("x"), &rule).unwrap_err();
        assert_eq!(err.to_string(), "Unknown validator: 'bogus'.");
    }

    #[test]
    fn shellsafe_rejects_metacharacters() {
        let plugin = ShellsafeValidator;
        assert!(plugin.validate(&json!("ls -la")).is_ok());
        assert_eq!(
            plugin.validate(&json!("rm -rf /; echo")).unwrap_err(),
            "rm -rf /; echo should not have ; in it"
        );
        assert!(plugin.validate(&json!("a && b")).is_err());
    }

    #[test]
    fn ipv6_plugin() {
        assert!(Ipv6AddressValidator.validate(&json!("::1")).is_ok());
        assert!(Ipv6AddressValidator.validate(&json!("10.0.0.1")).is_err());
    }

    #[test]
    fn length_check() {
        assert!(length(&json!("abc"), 3).is_ok());
        assert!(length(&json!("abcd"), 0).is_ok());
        assert_eq!(
            length(&json!("abcd"), 3).unwrap_err().to_string(),
            "Input string is longer than 3 character(s)"
        );
    }

    // -----------------------------------------------------------------------
    // Cache refresh
    // -----------------------------------------------------------------------

    #[test]
    fn cache_loads_once_within_refresh_window() {
        let registry = CountingRegistry {
            loads: AtomicUsize::new(0),
        };
        let cache = ValidatorCache::new();

        let table = cache.get_or_refresh(&registry, 1_000);
        assert!(table.contains_key("shellsafe"));
        cache.get_or_refresh(&registry, 1_000 + VALIDATOR_REFRESH_SECS);
        assert_eq!(registry.loads.load(Ordering::SeqCst), 1);

        cache.get_or_refresh(&registry, 1_001 + VALIDATOR_REFRESH_SECS);
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.last_refresh(), Some(1_001 + VALIDATOR_REFRESH_SECS));
    }

    #[test]
    fn concurrent_validations_share_one_load() {
        let registry = Arc::new(CountingRegistry {
            loads: AtomicUsize::new(0),
        });
        let validator = Arc::new(Validator::new(registry.clone()));
        let rule = ValidationRule::Plugin("shellsafe".to_string());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let validator = Arc::clone(&validator);
                let rule = rule.clone();
                std::thread::spawn(move || validator.validate_at(&json!("uptime"), &rule, 5_000))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(registry.loads.load(Ordering::SeqCst), 1);
    }
}
