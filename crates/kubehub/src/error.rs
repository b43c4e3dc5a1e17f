//! Error types for ksync-kubehub

use std::error::Error as StdError;
use std::fmt;

use kube::core::DynamicObject;
use kube::ResourceExt;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    #[error("kube: {0}")]
    Kube(#[from] kube::Error),

    #[error("group version {0} serves no resources")]
    EmptyGroupVersion(String),

    #[error("invalid group version {0:?}")]
    InvalidGroupVersion(String),

    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("building request: {0}")]
    Request(String),
}

impl DiscoveryError {
    /// Server-side overload (5xx, 429) or a refused/reset connection.
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Kube(kube::Error::Api(ae)) => ae.code >= 500 || ae.code == 429,
            DiscoveryError::Kube(e) => is_connection_error(e),
            _ => false,
        }
    }
}

fn is_connection_error(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            );
        }
        cur = err.source();
    }
    false
}

/// Verdict of a retry function that did not succeed.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RetryError {
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
    pub retryable: bool,
}

impl RetryError {
    /// Log and poll again.
    pub fn retryable(e: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self { source: e.into(), retryable: true }
    }

    /// Stop watching and surface `e`.
    pub fn permanent(e: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self { source: e.into(), retryable: false }
    }
}

/// Terminal outcome of an [`ObjectWatcher`](crate::ObjectWatcher) session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    #[error("timed out waiting for {name}{}", Observed(.object))]
    Timeout { name: String, object: Option<Box<DynamicObject>> },

    #[error("cancelled while waiting for {name}{}", Observed(.object))]
    Cancelled { name: String, object: Option<Box<DynamicObject>> },

    #[error("polling {name}: {source}")]
    Poll { name: String, source: kube::Error },

    #[error("{name}: {source}")]
    Retry { name: String, source: RetryError },

    #[error("poll task for {name} failed: {source}")]
    Join { name: String, source: tokio::task::JoinError },
}

impl WatchError {
    pub fn is_timeout(&self) -> bool { matches!(self, WatchError::Timeout { .. }) }
    pub fn is_cancelled(&self) -> bool { matches!(self, WatchError::Cancelled { .. }) }

    /// Last object observed before a timeout or cancellation.
    pub fn last_object(&self) -> Option<&DynamicObject> {
        match self {
            WatchError::Timeout { object, .. } | WatchError::Cancelled { object, .. } => object.as_deref(),
            _ => None,
        }
    }
}

struct Observed<'a>(&'a Option<Box<DynamicObject>>);

impl fmt::Display for Observed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(obj) = self.0 else { return Ok(()) };
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object");
        write!(f, " (last seen {}/{}", kind, obj.name_any())?;
        if let Some(rv) = obj.resource_version() {
            write!(f, " resourceVersion={rv}")?;
        }
        if let Some(g) = obj.metadata.generation {
            write!(f, " generation={g}")?;
        }
        f.write_str(")")
    }
}
