use fleetrpc_ddl::Ddl;
use fleetrpc_discovery::{ClientOptions, Discovery, DiscoveryError, DiscoveryLimit, DiscoveryMethod, DiscoveryRegistry};
use fleetrpc_types::{Filter, FilterKind, PluginKind, RunMode, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const FLATFILE_DDL: &str = r#"
[metadata]
name = "flatfile"
description = "Flatfile based discovery for node identities"
author = "ops"
license = "Apache-2.0"
version = "0.1"
url = "https://example.net"
timeout = 0

[discovery]
capabilities = ["identity"]
"#;

const MC_DDL: &str = r#"
[metadata]
name = "mc"
description = "Broadcast discovery over the bus"
author = "ops"
license = "Apache-2.0"
version = "0.1"
url = "https://example.net"
timeout = 2

[discovery]
capabilities = ["classes", "facts", "identity", "agents", "compound"]
"#;

/// Answers from a fixed host list, honouring identity filters.
struct ListMethod {
    ddl: Ddl,
    hosts: Vec<String>,
}

impl ListMethod {
    fn load(name: &str, src: &str, hosts: &[&str]) -> Arc<Self> {
        let ddl = Ddl::from_toml_str(name, PluginKind::Discovery, RunMode::Client, src)
            .expect("failed to parse discovery DDL");
        Arc::new(Self {
            ddl,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
        })
    }
}

impl DiscoveryMethod for ListMethod {
    fn name(&self) -> &str {
        self.ddl.plugin_name()
    }

    fn ddl(&self) -> &Ddl {
        &self.ddl
    }

    fn discover(&self, filter: &Filter, _timeout: Duration, _limit: usize) -> Result<Vec<String>, DiscoveryError> {
        if filter.identity.is_empty() {
            return Ok(self.hosts.clone());
        }
        Ok(self
            .hosts
            .iter()
            .filter(|host| filter.identity.contains(host))
            .cloned()
            .collect())
    }
}

fn make_test_discovery(method: Option<&str>) -> Discovery {
    let mut registry = DiscoveryRegistry::new();
    registry.register(ListMethod::load("mc", MC_DDL, &["web1", "web2", "db1"]));
    registry.register(ListMethod::load("flatfile", FLATFILE_DDL, &["web1", "db1"]));

    Discovery::new(&RuntimeConfig::default(), registry).with_options(ClientOptions {
        discovery_method: method.map(str::to_string),
    })
}

#[test]
fn declared_capabilities_and_timeout() {
    let method = ListMethod::load("flatfile", FLATFILE_DDL, &[]);
    assert_eq!(method.timeout(), Some(0));
    assert_eq!(method.capabilities().len(), 1);
}

#[test]
fn identity_filter_through_custom_method() {
    let mut discovery = make_test_discovery(Some("flatfile"));
    let filter = Filter::empty().with(FilterKind::Identity, "db1");
    let limit = DiscoveryLimit::try_from(&json!(0)).expect("failed to parse limit");
    let found = discovery.discover(&filter, None, limit).expect("failed to discover");
    assert_eq!(found, vec!["db1".to_string()]);
}

#[test]
fn fact_filter_rejected_by_custom_method() {
    let mut discovery = make_test_discovery(Some("flatfile"));
    let filter = Filter::empty().with(FilterKind::Fact, "country=uk");
    let err = discovery
        .discover(&filter, None, DiscoveryLimit::from(0))
        .expect_err("fact filter accepted");
    assert_eq!(
        err.to_string(),
        "Cannot use fact filters while using the 'flatfile' discovery method"
    );
}

#[test]
fn compound_filter_served_by_default_method() {
    let mut discovery = make_test_discovery(Some("flatfile"));
    let filter = Filter::empty().with(FilterKind::Compound, "web1 or web2");
    let found = discovery
        .discover(&filter, None, DiscoveryLimit::from(2))
        .expect("failed to discover");
    assert_eq!(found, vec!["web1".to_string(), "web2".to_string()]);
    assert_eq!(discovery.discovery_method().expect("failed to resolve method"), "mc");
}
