//! ksync store: shared informers per namespace.
//!
//! A [`Factories`] registry hands out one [`Factory`] per namespace. Each
//! factory runs at most one shared informer per resource and hands out
//! [`Informer`] subscriptions that replay the cache and then stream changes.

#![forbid(unsafe_code)]

pub mod error;
pub mod event;
pub mod factory;
pub mod informer;
pub mod observer;
pub mod selector;

pub use error::InformerError;
pub use event::{EventSink, EventType, WatchEvent};
pub use factory::{Factories, Factory};
pub use informer::Informer;
pub use observer::ObjectObserver;
pub use selector::LabelSelector;
