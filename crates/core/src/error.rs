//! Error types for ksync-core

use std::collections::BTreeSet;

use thiserror::Error;

use crate::value::Urn;

/// Values that have no plain-tree representation.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum PropertyError {
    #[error("cannot decode {kind} property at '{path}': no plain representation")]
    Unsupported { kind: &'static str, path: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid property path {path:?} at offset {at}: {reason}")]
pub struct PathParseError {
    pub path: String,
    pub at: usize,
    pub reason: &'static str,
}

impl PathParseError {
    pub(crate) fn new(path: &str, at: usize, reason: &'static str) -> Self {
        Self { path: path.to_string(), at, reason }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] PropertyError),

    /// The plain tree did not fit the target type.
    #[error("deserialize: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Raised only under `reject_unknowns`. Not a defect: the caller should
    /// register `dependencies` and retry once they are resolved.
    #[error("extracted value contains unknowns ({} dependencies)", dependencies.len())]
    ContainsUnknowns { dependencies: BTreeSet<Urn> },
}

impl ExtractError {
    pub fn is_contains_unknowns(&self) -> bool {
        matches!(self, ExtractError::ContainsUnknowns { .. })
    }

    /// Dependencies carried by a contains-unknowns error.
    pub fn dependencies(&self) -> Option<&BTreeSet<Urn>> {
        match self {
            ExtractError::ContainsUnknowns { dependencies } => Some(dependencies),
            _ => None,
        }
    }
}
