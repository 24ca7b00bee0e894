//! Request filters.
//!
//! A filter selects which nodes on the bus should act on a request. Every
//! kind holds a list of string expressions; a filter with no expressions at
//! all matches every node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of expression a [`Filter`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Configuration-management class membership (`cf_class`, also `class`).
    CfClass,
    /// Fact comparisons such as `country=uk`.
    Fact,
    /// Agent presence.
    Agent,
    /// Node identity.
    Identity,
    /// Compound expression trees combining the other kinds.
    Compound,
}

impl FilterKind {
    /// All kinds in wire order.
    pub const ALL: [FilterKind; 5] = [
        FilterKind::CfClass,
        FilterKind::Fact,
        FilterKind::Agent,
        FilterKind::Identity,
        FilterKind::Compound,
    ];

    /// Returns the wire key for this kind.
    pub fn key(self) -> &'static str {
        match self {
            FilterKind::CfClass => "cf_class",
            FilterKind::Fact => "fact",
            FilterKind::Agent => "agent",
            FilterKind::Identity => "identity",
            FilterKind::Compound => "compound",
        }
    }

    /// Returns the human label used in capability errors.
    pub fn label(self) -> &'static str {
        match self {
            FilterKind::CfClass => "class",
            other => other.key(),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error returned when parsing an unknown filter kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter kind: {0}")]
pub struct UnknownFilterKind(pub String);

impl FromStr for FilterKind {
    type Err = UnknownFilterKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cf_class" | "class" => Ok(FilterKind::CfClass),
            "fact" => Ok(FilterKind::Fact),
            "agent" => Ok(FilterKind::Agent),
            "identity" => Ok(FilterKind::Identity),
            "compound" => Ok(FilterKind::Compound),
            _ => Err(UnknownFilterKind(s.to_string())),
        }
    }
}

/// Filter features a discovery method can declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Can serve class filters.
    Classes,
    /// Can serve fact filters.
    Facts,
    /// Can serve identity filters.
    Identity,
    /// Can serve agent filters.
    Agents,
    /// Can serve compound filters.
    Compound,
}

impl Capability {
    /// Returns the capability required to serve a filter kind.
    pub fn for_kind(kind: FilterKind) -> Capability {
        match kind {
            FilterKind::CfClass => Capability::Classes,
            FilterKind::Fact => Capability::Facts,
            FilterKind::Agent => Capability::Agents,
            FilterKind::Identity => Capability::Identity,
            FilterKind::Compound => Capability::Compound,
        }
    }
}

/// A set of match expressions selecting target nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, alias = "class")]
    pub cf_class: Vec<String>,
    #[serde(default)]
    pub fact: Vec<String>,
    #[serde(default)]
    pub agent: Vec<String>,
    #[serde(default)]
    pub identity: Vec<String>,
    #[serde(default)]
    pub compound: Vec<String>,
}

impl Filter {
    /// Returns a filter that matches every node.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a filter whose only term is the given agent name.
    pub fn agent_only(agent: impl Into<String>) -> Self {
        Self {
            agent: vec![agent.into()],
            ..Self::default()
        }
    }

    /// Returns the expressions for one kind.
    pub fn terms(&self, kind: FilterKind) -> &[String] {
        match kind {
            FilterKind::CfClass => &self.cf_class,
            FilterKind::Fact => &self.fact,
            FilterKind::Agent => &self.agent,
            FilterKind::Identity => &self.identity,
            FilterKind::Compound => &self.compound,
        }
    }

    /// Appends an expression of the given kind.
    pub fn push(&mut self, kind: FilterKind, expression: impl Into<String>) {
        let terms = match kind {
            FilterKind::CfClass => &mut self.cf_class,
            FilterKind::Fact => &mut self.fact,
            FilterKind::Agent => &mut self.agent,
            FilterKind::Identity => &mut self.identity,
            FilterKind::Compound => &mut self.compound,
        };
        terms.push(expression.into());
    }

    /// Builder form of [`Filter::push`].
    pub fn with(mut self, kind: FilterKind, expression: impl Into<String>) -> Self {
        self.push(kind, expression);
        self
    }

    /// Returns the kinds that carry at least one expression, in wire order.
    pub fn kinds_in_use(&self) -> Vec<FilterKind> {
        FilterKind::ALL
            .into_iter()
            .filter(|kind| !self.terms(*kind).is_empty())
            .collect()
    }

    /// Returns `true` if the filter matches every node.
    pub fn is_empty(&self) -> bool {
        self.kinds_in_use().is_empty()
    }

    /// Returns `true` if any compound expression is present.
    pub fn has_compound(&self) -> bool {
        !self.compound.is_empty()
    }
}
