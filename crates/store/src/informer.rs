//! Shared informers and subscriber handles.
//!
//! One [`SharedInformer`] runs per (factory, resource). It mirrors the
//! list/watch stream into an in-memory store and fans changes out to every
//! registered handler. Lossy handlers are offered events inline. Blocking
//! handlers feed a small bounded buffer drained by their own pump task; when
//! that buffer is full the shared loop waits, so a stalled consumer holds the
//! stream back instead of growing memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kube::core::DynamicObject;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use ksync_kubehub::{EventStream, GroupVersionResource};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{offer, EventSink, EventType, WatchEvent};
use crate::selector::LabelSelector;
use crate::InformerError;

/// Events a blocking handler may have queued ahead of its pump.
const PUMP_BUFFER: usize = 16;

fn object_key(obj: &DynamicObject) -> String {
    match obj.namespace() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Syncing,
    Synced,
    Stopped,
}

enum Handler {
    Lossy(mpsc::Sender<WatchEvent>),
    Blocking(BlockingTarget),
}

#[derive(Clone)]
struct BlockingTarget {
    id: u64,
    tx: mpsc::Sender<WatchEvent>,
    closed: CancellationToken,
}

/// Changes from one stream event plus the blocking handlers that still have
/// to receive them.
#[derive(Default)]
struct Batch {
    events: Vec<WatchEvent>,
    targets: Vec<BlockingTarget>,
}

#[derive(Default)]
struct State {
    items: FxHashMap<String, DynamicObject>,
    handlers: FxHashMap<u64, Handler>,
}

impl State {
    /// Offer lossy handlers the events now; hand back who must be waited on.
    fn fan_out(&mut self, events: Vec<WatchEvent>) -> Batch {
        if events.is_empty() {
            return Batch::default();
        }
        for ev in &events {
            counter!("informer_events_total", 1u64, "type" => ev.event_type.to_string());
        }
        let mut targets = Vec::new();
        self.handlers.retain(|_, h| match h {
            Handler::Lossy(tx) => events.iter().all(|ev| offer(tx, ev.clone())),
            Handler::Blocking(t) => {
                targets.push(t.clone());
                true
            }
        });
        Batch { events, targets }
    }
}

pub(crate) struct SharedInformer {
    gvr: GroupVersionResource,
    state: Mutex<State>,
    phase: watch::Sender<Phase>,
    next_id: AtomicU64,
}

impl SharedInformer {
    /// Start mirroring `stream` until `shutdown` fires.
    pub(crate) fn spawn(
        gvr: GroupVersionResource,
        stream: EventStream,
        resync: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(Phase::Syncing);
        let informer =
            Arc::new(Self { gvr, state: Mutex::new(State::default()), phase, next_id: AtomicU64::new(1) });
        tokio::spawn(informer.clone().run(stream, resync, shutdown));
        informer
    }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    async fn run(self: Arc<Self>, mut stream: EventStream, resync: Duration, shutdown: CancellationToken) {
        info!(gvr = %self.gvr, resync_secs = resync.as_secs(), "informer started");
        let mut ticker = interval_at(Instant::now() + resync, resync);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.resync(),
                next = stream.next() => match next {
                    Some(Ok(ev)) => self.apply(ev),
                    Some(Err(e)) => {
                        warn!(gvr = %self.gvr, error = %e, "watch error; continuing");
                        continue;
                    }
                    None => {
                        warn!(gvr = %self.gvr, "watch stream ended");
                        break;
                    }
                },
            };
            if !self.deliver(batch, &shutdown).await {
                break;
            }
        }
        // dropping the senders ends every pump
        self.lock().handlers.clear();
        self.phase.send_replace(Phase::Stopped);
        info!(gvr = %self.gvr, "informer stopped");
    }

    /// Wait until every blocking handler in `batch` has buffered its events.
    /// Returns false if `shutdown` fired meanwhile.
    async fn deliver(&self, batch: Batch, shutdown: &CancellationToken) -> bool {
        let mut gone = Vec::new();
        for ev in &batch.events {
            for t in &batch.targets {
                if gone.contains(&t.id) {
                    continue;
                }
                let sent = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return false,
                    _ = t.closed.cancelled() => false,
                    res = t.tx.send(ev.clone()) => res.is_ok(),
                };
                if !sent {
                    gone.push(t.id);
                }
            }
        }
        if !gone.is_empty() {
            let mut st = self.lock();
            for id in &gone {
                st.handlers.remove(id);
            }
        }
        true
    }

    fn apply(&self, ev: Event<DynamicObject>) -> Batch {
        let mut st = self.lock();
        match ev {
            Event::Applied(obj) => {
                let event_type = match st.items.insert(object_key(&obj), obj.clone()) {
                    Some(_) => EventType::Modified,
                    None => EventType::Added,
                };
                st.fan_out(vec![WatchEvent::new(event_type, obj)])
            }
            Event::Deleted(obj) => {
                st.items.remove(&object_key(&obj));
                st.fan_out(vec![WatchEvent::new(EventType::Deleted, obj)])
            }
            Event::Restarted(list) => {
                let fresh: FxHashMap<String, DynamicObject> = list.into_iter().map(|o| (object_key(&o), o)).collect();
                let mut events = Vec::with_capacity(fresh.len());
                for (key, obj) in &fresh {
                    let event_type = if st.items.contains_key(key) { EventType::Modified } else { EventType::Added };
                    events.push(WatchEvent::new(event_type, obj.clone()));
                }
                let removed = st.items.iter().filter(|(k, _)| !fresh.contains_key(*k)).count();
                events.extend(
                    st.items
                        .iter()
                        .filter(|(k, _)| !fresh.contains_key(*k))
                        .map(|(_, o)| WatchEvent::new(EventType::Deleted, o.clone())),
                );
                debug!(gvr = %self.gvr, items = fresh.len(), removed, "relisted");
                st.items = fresh;
                let batch = st.fan_out(events);
                drop(st);
                self.phase.send_if_modified(|p| {
                    let first = *p == Phase::Syncing;
                    if first {
                        *p = Phase::Synced;
                    }
                    first
                });
                batch
            }
        }
    }

    fn resync(&self) -> Batch {
        let mut st = self.lock();
        let events: Vec<WatchEvent> =
            st.items.values().map(|o| WatchEvent::new(EventType::Modified, o.clone())).collect();
        debug!(gvr = %self.gvr, items = events.len(), "resync");
        st.fan_out(events)
    }

    /// Register `sink`; the current items are delivered as `Added` before any
    /// live event.
    fn register(&self, sink: EventSink, closed: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut st = self.lock();
        let replay: Vec<WatchEvent> =
            st.items.values().map(|o| WatchEvent::new(EventType::Added, o.clone())).collect();
        match sink {
            EventSink::Lossy(tx) => {
                if replay.into_iter().all(|ev| offer(&tx, ev)) {
                    st.handlers.insert(id, Handler::Lossy(tx));
                }
            }
            EventSink::Blocking(out) => {
                let (tx, rx) = mpsc::channel(PUMP_BUFFER);
                st.handlers.insert(id, Handler::Blocking(BlockingTarget { id, tx, closed: closed.clone() }));
                spawn_pump(self.gvr.clone(), replay, rx, out, closed);
            }
        }
        id
    }

    fn unregister(&self, id: u64) { self.lock().handlers.remove(&id); }

    /// False if the informer stopped before its first list completed.
    pub(crate) async fn wait_synced(&self) -> bool {
        let mut rx = self.phase.subscribe();
        let synced = match rx.wait_for(|p| *p != Phase::Syncing).await {
            Ok(p) => *p == Phase::Synced,
            Err(_) => false,
        };
        synced
    }

    pub(crate) fn has_synced(&self) -> bool { *self.phase.borrow() == Phase::Synced }

    pub(crate) fn is_stopped(&self) -> bool { *self.phase.borrow() == Phase::Stopped }

    fn list(&self, selector: &LabelSelector) -> Vec<DynamicObject> {
        let st = self.lock();
        let mut out: Vec<DynamicObject> = st.items.values().filter(|o| selector.matches_object(o)).cloned().collect();
        out.sort_by_key(object_key);
        out
    }
}

/// Deliver `replay`, then everything arriving on `rx`, to `out`.
fn spawn_pump(
    gvr: GroupVersionResource,
    replay: Vec<WatchEvent>,
    mut rx: mpsc::Receiver<WatchEvent>,
    out: mpsc::Sender<WatchEvent>,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        let mut replay = replay.into_iter();
        loop {
            let ev = match replay.next() {
                Some(ev) => ev,
                None => tokio::select! {
                    biased;
                    _ = closed.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                },
            };
            let delivered = tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                res = out.send(ev) => res.is_ok(),
            };
            if !delivered {
                debug!(gvr = %gvr, "subscriber went away");
                break;
            }
        }
    });
}

/// A subscription to one shared informer.
///
/// Dropping the handle closes it. Closing never stops the shared informer,
/// which other subscribers may still use.
pub struct Informer {
    shared: Arc<SharedInformer>,
    handler: Option<u64>,
    closed: CancellationToken,
}

impl Informer {
    pub(crate) fn new(shared: Arc<SharedInformer>, sink: Option<EventSink>, closed: CancellationToken) -> Self {
        let handler = sink.map(|sink| shared.register(sink, closed.clone()));
        Self { shared, handler, closed }
    }

    pub fn gvr(&self) -> &GroupVersionResource { &self.shared.gvr }

    pub fn has_synced(&self) -> bool { self.shared.has_synced() }

    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

    /// Cached objects matching `selector`, ordered by namespace/name.
    pub fn list(&self, selector: &LabelSelector) -> Result<Vec<DynamicObject>, InformerError> {
        if self.is_closed() {
            return Err(InformerError::Closed);
        }
        Ok(self.shared.list(selector))
    }

    /// Stop event delivery. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(id) = self.handler.take() {
            self.shared.unregister(id);
            debug!(gvr = %self.shared.gvr, handler = id, "subscription closed");
        }
        self.closed.cancel();
    }
}

impl Drop for Informer {
    fn drop(&mut self) { self.close(); }
}

impl std::fmt::Debug for Informer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("gvr", &self.shared.gvr)
            .field("handler", &self.handler)
            .field("closed", &self.is_closed())
            .finish()
    }
}
