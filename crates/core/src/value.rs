//! Annotated property values exchanged with the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique resource name used as the unit of dependency tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Urn {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for Urn {
    fn from(s: String) -> Self { Self(s) }
}

/// Property bag keyed by name. Iteration order is sorted by key.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Opaque reference to file-like content managed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Asset {
    pub hash: String,
    pub location: String,
}

/// Opaque reference to a bundle of assets managed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Archive {
    pub hash: String,
    pub location: String,
}

/// A value that carries liveness metadata around its element.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub element: Box<PropertyValue>,
    /// `false` means the element is a placeholder and must not be read.
    pub known: bool,
    pub secret: bool,
    pub dependencies: BTreeSet<Urn>,
}

/// Closed set of property value variants.
///
/// `Computed`, `Output` and `Secret` are wrappers: they annotate an inner
/// element instead of being data themselves. `Computed` holds only a shape
/// hint and never a real value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(PropertyMap),
    Asset(Asset),
    Archive(Archive),
    ResourceReference { urn: Urn, id: Option<String> },
    Computed(Box<PropertyValue>),
    Output(Output),
    Secret(Box<PropertyValue>),
}

impl PropertyValue {
    pub fn string(s: impl Into<String>) -> Self { Self::String(s.into()) }

    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, PropertyValue)>,
        K: Into<String>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap `v` as secret.
    pub fn secret(v: PropertyValue) -> Self { Self::Secret(Box::new(v)) }

    /// Mark a value as not yet available; `shape` is only a type hint.
    pub fn computed(shape: PropertyValue) -> Self { Self::Computed(Box::new(shape)) }

    /// A known output carrying `element`.
    pub fn known_output<I>(element: PropertyValue, secret: bool, dependencies: I) -> Self
    where
        I: IntoIterator<Item = Urn>,
    {
        Self::Output(Output {
            element: Box::new(element),
            known: true,
            secret,
            dependencies: dependencies.into_iter().collect(),
        })
    }

    /// An output whose element is not available yet.
    pub fn unknown_output<I>(secret: bool, dependencies: I) -> Self
    where
        I: IntoIterator<Item = Urn>,
    {
        Self::Output(Output {
            element: Box::new(PropertyValue::Null),
            known: false,
            secret,
            dependencies: dependencies.into_iter().collect(),
        })
    }

    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }
    pub fn is_computed(&self) -> bool { matches!(self, Self::Computed(_)) }
    pub fn is_output(&self) -> bool { matches!(self, Self::Output(_)) }
    pub fn is_secret(&self) -> bool { matches!(self, Self::Secret(_)) }

    /// True for the annotation variants that wrap another value.
    pub fn is_wrapper(&self) -> bool {
        matches!(self, Self::Computed(_) | Self::Output(_) | Self::Secret(_))
    }

    /// Whether this value or anything nested inside it is unknown.
    pub fn contains_unknowns(&self) -> bool {
        match self {
            Self::Computed(_) => true,
            Self::Output(o) => !o.known || o.element.contains_unknowns(),
            Self::Secret(e) => e.contains_unknowns(),
            Self::Array(items) => items.iter().any(PropertyValue::contains_unknowns),
            Self::Object(map) => map.values().any(PropertyValue::contains_unknowns),
            _ => false,
        }
    }

    /// Whether this value or anything nested inside it is secret.
    pub fn contains_secrets(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::Output(o) => o.secret || o.element.contains_secrets(),
            Self::Computed(e) => e.contains_secrets(),
            Self::Array(items) => items.iter().any(PropertyValue::contains_secrets),
            Self::Object(map) => map.values().any(PropertyValue::contains_secrets),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Asset(_) => "asset",
            Self::Archive(_) => "archive",
            Self::ResourceReference { .. } => "resource reference",
            Self::Computed(_) => "computed",
            Self::Output(_) => "output",
            Self::Secret(_) => "secret",
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self { Self::String(s.to_string()) }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self { Self::String(s) }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self { Self::Array(items) }
}

impl From<PropertyMap> for PropertyValue {
    fn from(map: PropertyMap) -> Self { Self::Object(map) }
}
