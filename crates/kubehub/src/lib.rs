//! ksync kubehub: cached discovery, REST mapping, list/watch sources and
//! single-object polling.

#![forbid(unsafe_code)]

pub mod discovery;
pub mod error;
pub mod gvr;
pub mod listwatch;
pub mod mapper;
pub mod watcher;

pub use discovery::{CachedDiscovery, DiscoveryClient, KubeDiscovery};
pub use error::{DiscoveryError, RetryError, WatchError};
pub use gvr::{parse_gvk_key, GroupVersionResource};
pub use listwatch::{EventStream, ListWatch};
pub use mapper::{RestMapper, DEFAULT_NAMESPACE};
pub use watcher::{ObjectWatcher, PollFn};
