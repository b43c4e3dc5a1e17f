//! Error types for ksync-store

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InformerError {
    #[error("cannot subscribe to an empty group/version/resource")]
    EmptyResource,

    #[error("informer factory for namespace {namespace:?} is shut down")]
    Shutdown { namespace: String },

    #[error("informer is closed")]
    Closed,

    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}
