//! Client-side discovery: picks a discovery method, checks it can serve
//! the filter, and runs it with a bounded timeout and result count.

use crate::DiscoveryError;
use fleetrpc_ddl::Ddl;
use fleetrpc_types::{Capability, Filter, FilterKind, RuntimeConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Filter kinds a method must explicitly declare before it may serve them.
/// Agent filters are served by every method.
const CHECKED_KINDS: [FilterKind; 4] = [
    FilterKind::CfClass,
    FilterKind::Fact,
    FilterKind::Identity,
    FilterKind::Compound,
];

/// A backend that resolves a filter into node identities.
pub trait DiscoveryMethod: Send + Sync {
    fn name(&self) -> &str;

    /// The method's contract. Declares its capabilities and timeout.
    fn ddl(&self) -> &Ddl;

    fn capabilities(&self) -> &[Capability] {
        self.ddl().discovery_capabilities()
    }

    /// Declared timeout in seconds, if the contract names one.
    fn timeout(&self) -> Option<u64> {
        self.ddl().meta().timeout
    }

    /// Returns the identities matching `filter`. `limit` is a hint, 0 for
    /// unbounded; callers truncate the result themselves.
    fn discover(&self, filter: &Filter, timeout: Duration, limit: usize) -> Result<Vec<String>, DiscoveryError>;
}

/// Known discovery methods by name.
#[derive(Default, Clone)]
pub struct DiscoveryRegistry {
    methods: BTreeMap<String, Arc<dyn DiscoveryMethod>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Arc<dyn DiscoveryMethod>) {
        tracing::debug!(method = %method.name(), "registered discovery method");
        self.methods.insert(method.name().to_string(), method);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DiscoveryMethod>> {
        self.methods.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}

/// Per-client discovery preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Preferred method. `None` uses the configured default.
    pub discovery_method: Option<String>,
}

/// Maximum number of identities to return. 0 means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryLimit(pub usize);

impl From<usize> for DiscoveryLimit {
    fn from(limit: usize) -> Self {
        Self(limit)
    }
}

impl TryFrom<&Value> for DiscoveryLimit {
    type Error = DiscoveryError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Self)
            .ok_or(DiscoveryError::InvalidLimit)
    }
}

/// Discovery front end for one client.
pub struct Discovery {
    registry: DiscoveryRegistry,
    options: ClientOptions,
    default_method: String,
    default_timeout: u64,
    direct_addressing: bool,
}

impl Discovery {
    pub fn new(config: &RuntimeConfig, registry: DiscoveryRegistry) -> Self {
        Self {
            registry,
            options: ClientOptions::default(),
            default_method: config.default_discovery_method.clone(),
            default_timeout: config.default_discovery_timeout,
            direct_addressing: config.direct_addressing,
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    pub fn known_methods(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Resolves the method to use.
    ///
    /// A method other than the default is accepted only when it is known
    /// and direct addressing is enabled.
    pub fn discovery_method(&self) -> Result<String, DiscoveryError> {
        let Some(requested) = self.options.discovery_method.as_deref() else {
            return Ok(self.default_method.clone());
        };
        if requested == self.default_method {
            return Ok(requested.to_string());
        }
        if !self.has_method(requested) {
            return Err(DiscoveryError::UnknownMethod(requested.to_string()));
        }
        if !self.direct_addressing {
            return Err(DiscoveryError::DirectAddressingRequired);
        }
        Ok(requested.to_string())
    }

    /// Switches to the default method when `filter` has compound terms.
    /// Returns whether the preference was overridden.
    pub fn force_discovery_method_by_filter(&mut self, filter: &Filter) -> Result<bool, DiscoveryError> {
        if !filter.has_compound() || self.discovery_method()? == self.default_method {
            return Ok(false);
        }
        tracing::info!(
            method = %self.default_method,
            "Switching to {} discovery method because compound filters are used",
            self.default_method
        );
        self.options.discovery_method = Some(self.default_method.clone());
        Ok(true)
    }

    /// Fails on the first filter kind in use that the method cannot serve.
    pub fn check_capabilities(&self, method: &dyn DiscoveryMethod, filter: &Filter) -> Result<(), DiscoveryError> {
        let capabilities = method.capabilities();
        for kind in CHECKED_KINDS {
            if !filter.terms(kind).is_empty() && !capabilities.contains(&Capability::for_kind(kind)) {
                return Err(DiscoveryError::UnsupportedFilter {
                    method: method.name().to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Discovers the identities matching `filter`.
    ///
    /// The timeout is `timeout` when given, else the method's declared
    /// timeout, else the configured default. A nonzero limit keeps the
    /// first `limit` identities in the order the method returned them.
    pub fn discover(
        &mut self,
        filter: &Filter,
        timeout: Option<u64>,
        limit: DiscoveryLimit,
    ) -> Result<Vec<String>, DiscoveryError> {
        self.force_discovery_method_by_filter(filter)?;

        let name = self.discovery_method()?;
        let method = Arc::clone(
            self.registry
                .get(&name)
                .ok_or_else(|| DiscoveryError::UnknownMethod(name.clone()))?,
        );

        self.check_capabilities(method.as_ref(), filter)?;

        let seconds = timeout
            .or_else(|| method.timeout())
            .unwrap_or(self.default_timeout);
        tracing::debug!(method = %name, timeout = seconds, limit = limit.0, "running discovery");

        let mut found = method.discover(filter, Duration::from_secs(seconds), limit.0)?;
        if limit.0 > 0 {
            found.truncate(limit.0);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetrpc_ddl::Metadata;
    use fleetrpc_types::{PluginKind, RunMode};
    use serde_json::json;
    use std::sync::Mutex;

    struct StaticMethod {
        ddl: Ddl,
        nodes: Vec<String>,
        calls: Mutex<Vec<(Duration, usize)>>,
    }

    fn make_test_method(name: &str, capabilities: Vec<Capability>, timeout: Option<u64>) -> Arc<StaticMethod> {
        let mut ddl = Ddl::new(name, PluginKind::Discovery, RunMode::Client);
        ddl.metadata(Metadata {
            name: name.to_string(),
            timeout,
            ..Metadata::default()
        });
        ddl.capabilities(capabilities).unwrap();
        Arc::new(StaticMethod {
            ddl,
            nodes: (1..=5).map(|n| format!("node{}", n)).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    impl DiscoveryMethod for StaticMethod {
        fn name(&self) -> &str {
            self.ddl.plugin_name()
        }

        fn ddl(&self) -> &Ddl {
            &self.ddl
        }

        fn discover(&self, _filter: &Filter, timeout: Duration, limit: usize) -> Result<Vec<String>, DiscoveryError> {
            self.calls.lock().unwrap().push((timeout, limit));
            Ok(self.nodes.clone())
        }
    }

    fn make_test_discovery(direct_addressing: bool) -> (Discovery, Arc<StaticMethod>, Arc<StaticMethod>) {
        let mc = make_test_method(
            "mc",
            vec![
                Capability::Classes,
                Capability::Facts,
                Capability::Identity,
                Capability::Agents,
                Capability::Compound,
            ],
            Some(2),
        );
        let flatfile = make_test_method("flatfile", vec![Capability::Identity], None);

        let mut registry = DiscoveryRegistry::new();
        registry.register(mc.clone());
        registry.register(flatfile.clone());

        let config = RuntimeConfig {
            direct_addressing,
            ..RuntimeConfig::default()
        };
        (Discovery::new(&config, registry), mc, flatfile)
    }

    fn prefer(method: &str) -> ClientOptions {
        ClientOptions {
            discovery_method: Some(method.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Limits
    // -----------------------------------------------------------------------

    #[test]
    fn limit_parsing() {
        assert_eq!(DiscoveryLimit::try_from(&json!(3)), Ok(DiscoveryLimit(3)));
        assert_eq!(DiscoveryLimit::try_from(&json!(0)), Ok(DiscoveryLimit(0)));
        for bad in [json!(1.1), json!(-1), json!("1"), json!(null)] {
            let err = DiscoveryLimit::try_from(&bad).unwrap_err();
            assert_eq!(err.to_string(), "Limit has to be an integer");
        }
    }

    #[test]
    fn limit_truncates_results() {
        let (mut discovery, _, _) = make_test_discovery(true);
        let limited = discovery.discover(&Filter::empty(), Some(1), DiscoveryLimit(1)).unwrap();
        assert_eq!(limited, vec!["node1".to_string()]);

        let all = discovery.discover(&Filter::empty(), Some(1), DiscoveryLimit(0)).unwrap();
        assert_eq!(all.len(), 5);
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    #[test]
    fn uses_declared_timeout_when_none_given() {
        let (mut discovery, mc, _) = make_test_discovery(true);
        discovery.discover(&Filter::empty(), None, DiscoveryLimit(0)).unwrap();
        assert_eq!(*mc.calls.lock().unwrap(), vec![(Duration::from_secs(2), 0)]);
    }

    #[test]
    fn explicit_timeout_wins() {
        let (mut discovery, mc, _) = make_test_discovery(true);
        discovery.discover(&Filter::empty(), Some(7), DiscoveryLimit(3)).unwrap();
        assert_eq!(*mc.calls.lock().unwrap(), vec![(Duration::from_secs(7), 3)]);
    }

    #[test]
    fn falls_back_to_configured_timeout() {
        let (discovery, _, flatfile) = make_test_discovery(true);
        let mut discovery = discovery.with_options(prefer("flatfile"));
        discovery.discover(&Filter::empty(), None, DiscoveryLimit(0)).unwrap();
        assert_eq!(*flatfile.calls.lock().unwrap(), vec![(Duration::from_secs(2), 0)]);
    }

    // -----------------------------------------------------------------------
    // Method selection
    // -----------------------------------------------------------------------

    #[test]
    fn defaults_to_configured_method() {
        let (discovery, _, _) = make_test_discovery(true);
        assert_eq!(discovery.discovery_method().unwrap(), "mc");
        assert!(discovery.has_method("mc"));
        assert!(!discovery.has_method("remote"));
        assert_eq!(discovery.known_methods(), vec!["flatfile".to_string(), "mc".to_string()]);
    }

    #[test]
    fn client_preference_is_honoured() {
        let (discovery, _, _) = make_test_discovery(true);
        let discovery = discovery.with_options(prefer("flatfile"));
        assert_eq!(discovery.discovery_method().unwrap(), "flatfile");
    }

    #[test]
    fn unknown_method_is_rejected() {
        let (discovery, _, _) = make_test_discovery(true);
        let discovery = discovery.with_options(prefer("remote"));
        let err = discovery.discovery_method().unwrap_err();
        assert_eq!(err.to_string(), "Unknown discovery method remote");
    }

    #[test]
    fn custom_method_requires_direct_addressing() {
        let (discovery, _, _) = make_test_discovery(false);
        let discovery = discovery.with_options(prefer("flatfile"));
        let err = discovery.discovery_method().unwrap_err();
        assert_eq!(err, DiscoveryError::DirectAddressingRequired);
        assert_eq!(err.to_string(), "Custom discovery methods require direct addressing mode");
    }

    #[test]
    fn compound_filter_forces_default_method() {
        let (discovery, mc, flatfile) = make_test_discovery(true);
        let mut discovery = discovery.with_options(prefer("flatfile"));
        let filter = Filter::empty().with(FilterKind::Compound, "country=uk and apache");

        assert!(discovery.force_discovery_method_by_filter(&filter).unwrap());
        assert_eq!(discovery.options().discovery_method.as_deref(), Some("mc"));

        discovery.discover(&filter, None, DiscoveryLimit(0)).unwrap();
        assert_eq!(mc.calls.lock().unwrap().len(), 1);
        assert!(flatfile.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn no_force_without_compound_terms() {
        let (discovery, _, _) = make_test_discovery(true);
        let mut discovery = discovery.with_options(prefer("flatfile"));
        let filter = Filter::empty().with(FilterKind::Identity, "node1");
        assert!(!discovery.force_discovery_method_by_filter(&filter).unwrap());
        assert_eq!(discovery.options().discovery_method.as_deref(), Some("flatfile"));
    }

    // -----------------------------------------------------------------------
    // Capabilities
    // -----------------------------------------------------------------------

    #[test]
    fn unsupported_filters_fail() {
        let (discovery, _, _) = make_test_discovery(true);
        let bare = make_test_method("remote", Vec::new(), None);

        let err = discovery
            .check_capabilities(bare.as_ref(), &Filter::empty().with(FilterKind::CfClass, "apache"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use class filters while using the 'remote' discovery method"
        );

        for kind in [FilterKind::Fact, FilterKind::Identity, FilterKind::Compound] {
            let err = discovery
                .check_capabilities(bare.as_ref(), &Filter::empty().with(kind, "filter"))
                .unwrap_err();
            assert!(err.to_string().starts_with(&format!("Cannot use {} filters", kind.key())));
        }
    }

    #[test]
    fn agent_filters_need_no_capability() {
        let (discovery, _, _) = make_test_discovery(true);
        let bare = make_test_method("remote", Vec::new(), None);
        assert!(discovery
            .check_capabilities(bare.as_ref(), &Filter::agent_only("rpcutil"))
            .is_ok());
    }

    #[test]
    fn discover_checks_capabilities_first() {
        let (discovery, _, flatfile) = make_test_discovery(true);
        let mut discovery = discovery.with_options(prefer("flatfile"));
        let err = discovery
            .discover(&Filter::empty().with(FilterKind::Fact, "country=uk"), None, DiscoveryLimit(0))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::UnsupportedFilter { kind: FilterKind::Fact, .. }));
        assert!(flatfile.calls.lock().unwrap().is_empty());
    }
}
