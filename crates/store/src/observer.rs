//! Track the latest state of one object from an informer event stream.

use std::cmp::Ordering;

use kube::core::DynamicObject;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::{EventType, WatchEvent};

/// Follows a single object by name. Out-of-order events never move the
/// observed state backwards.
#[derive(Debug, Clone)]
pub struct ObjectObserver {
    object: DynamicObject,
    deleted: bool,
}

impl ObjectObserver {
    pub fn new(object: DynamicObject) -> Self { Self { object, deleted: false } }

    pub fn object(&self) -> &DynamicObject { &self.object }

    pub fn into_object(self) -> DynamicObject { self.object }

    /// Whether the last accepted event was a deletion.
    pub fn is_deleted(&self) -> bool { self.deleted }

    /// Same name, and same namespace when both sides have one.
    pub fn keeps(&self, obj: &DynamicObject) -> bool {
        if obj.name_any() != self.object.name_any() {
            return false;
        }
        match (obj.namespace(), self.object.namespace()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Apply `ev` if it is about this object and not older than what we hold.
    /// Returns whether the observed state changed.
    pub fn observe(&mut self, ev: &WatchEvent) -> bool {
        if !self.keeps(&ev.object) || self.is_stale(&ev.object) {
            return false;
        }
        self.object = ev.object.clone();
        self.deleted = ev.event_type == EventType::Deleted;
        true
    }

    fn is_stale(&self, incoming: &DynamicObject) -> bool {
        let current_gen = self.object.metadata.generation.unwrap_or(0);
        let incoming_gen = incoming.metadata.generation.unwrap_or(0);
        match incoming_gen.cmp(&current_gen) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => {
                let rv = |o: &DynamicObject| o.resource_version().and_then(|rv| rv.parse::<i64>().ok());
                match (rv(&self.object), rv(incoming)) {
                    (Some(current), Some(new)) if new < current => {
                        debug!(
                            name = %self.object.name_any(),
                            generation = incoming_gen,
                            current_rv = current,
                            event_rv = new,
                            "ignored stale event"
                        );
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Observe events from `rx` until `done` accepts the observed state, the
    /// channel closes, or `cancel` fires. Returns whether `done` was satisfied.
    pub async fn observe_until<F>(
        &mut self,
        rx: &mut mpsc::Receiver<WatchEvent>,
        cancel: &CancellationToken,
        mut done: F,
    ) -> bool
    where
        F: FnMut(&ObjectObserver) -> bool,
    {
        if done(self) {
            return true;
        }
        loop {
            let ev = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => return false,
                },
            };
            if self.observe(&ev) && done(self) {
                return true;
            }
        }
    }
}
