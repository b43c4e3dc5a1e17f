//! Change notifications delivered to subscribers.

use std::fmt;

use kube::core::DynamicObject;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: DynamicObject,
}

impl WatchEvent {
    pub fn new(event_type: EventType, object: DynamicObject) -> Self { Self { event_type, object } }
}

/// Where a subscription delivers its events.
///
/// With `Blocking` the shared informer waits for the consumer once a small
/// per-subscription buffer is full, so the receiver must be drained for as
/// long as the subscription lives. `Lossy` never waits: events that do not fit
/// are dropped.
#[derive(Debug, Clone)]
pub enum EventSink {
    Blocking(mpsc::Sender<WatchEvent>),
    Lossy(mpsc::Sender<WatchEvent>),
}

/// Non-blocking hand-off used by lossy sinks. Returns false once the
/// receiver is gone; a full channel drops the event and still returns true.
pub(crate) fn offer(tx: &mpsc::Sender<WatchEvent>, ev: WatchEvent) -> bool {
    match tx.try_send(ev) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(ev)) => {
            counter!("informer_events_dropped_total", 1u64);
            debug!(event = %ev.event_type, name = ?ev.object.metadata.name, "subscriber full; event dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
