//! Per-namespace informer factories.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ksync_kubehub::{GroupVersionResource, ListWatch};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::EventSink;
use crate::informer::{Informer, SharedInformer};
use crate::InformerError;

fn resync_interval() -> Duration {
    let secs = std::env::var("KSYNC_RESYNC_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(60);
    Duration::from_secs(secs).max(Duration::from_secs(1))
}

struct FactoryInner {
    source: Arc<dyn ListWatch>,
    namespace: String,
    resync: Duration,
    shutdown: CancellationToken,
    informers: Mutex<FxHashMap<GroupVersionResource, Arc<SharedInformer>>>,
}

/// Shared informers for one namespace (`""` means all namespaces).
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl Factory {
    /// A factory nobody else shares, stopped by `shutdown`.
    pub fn new(source: Arc<dyn ListWatch>, namespace: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self::with_resync(source, namespace, shutdown, resync_interval())
    }

    pub fn with_resync(
        source: Arc<dyn ListWatch>,
        namespace: impl Into<String>,
        shutdown: CancellationToken,
        resync: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                source,
                namespace: namespace.into(),
                resync: resync.max(Duration::from_millis(1)),
                shutdown,
                informers: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn namespace(&self) -> &str { &self.inner.namespace }

    pub fn is_shut_down(&self) -> bool { self.inner.shutdown.is_cancelled() }

    fn informers(&self) -> MutexGuard<'_, FxHashMap<GroupVersionResource, Arc<SharedInformer>>> {
        self.inner.informers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Running shared informer for `gvr`; restarts one whose stream ended.
    fn shared(&self, gvr: &GroupVersionResource) -> Arc<SharedInformer> {
        let mut informers = self.informers();
        if let Some(existing) = informers.get(gvr).filter(|i| !i.is_stopped()) {
            return existing.clone();
        }
        let ns = Some(self.inner.namespace.as_str()).filter(|ns| !ns.is_empty());
        let stream = self.inner.source.list_watch(gvr, ns);
        let informer = SharedInformer::spawn(gvr.clone(), stream, self.inner.resync, self.inner.shutdown.child_token());
        debug!(gvr = %gvr, ns = %self.inner.namespace, "shared informer created");
        informers.insert(gvr.clone(), informer.clone());
        informer
    }

    /// Subscribe to `gvr`, waiting until its cache holds a full list.
    ///
    /// With a sink, every cached object is first delivered as `Added`, then
    /// live changes follow. Without one the informer only serves `list`.
    pub async fn subscribe(
        &self,
        gvr: &GroupVersionResource,
        sink: Option<EventSink>,
    ) -> Result<Informer, InformerError> {
        if gvr.is_empty() {
            return Err(InformerError::EmptyResource);
        }
        let shut_down = || InformerError::Shutdown { namespace: self.inner.namespace.clone() };
        if self.is_shut_down() {
            return Err(shut_down());
        }
        let shared = self.shared(gvr);
        let informer = Informer::new(shared.clone(), sink, self.inner.shutdown.child_token());
        let synced = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => false,
            synced = shared.wait_synced() => synced,
        };
        if !synced {
            return Err(shut_down());
        }
        Ok(informer)
    }

    /// Stop every shared informer of this factory.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.informers().clear();
    }
}

/// Process-wide registry of factories keyed by namespace.
pub struct Factories {
    factories: Mutex<FxHashMap<String, Factory>>,
    shutdown: CancellationToken,
    resync: Duration,
}

impl Default for Factories {
    fn default() -> Self { Self::new() }
}

impl Factories {
    pub fn new() -> Self { Self::with_resync(resync_interval()) }

    pub fn with_resync(resync: Duration) -> Self {
        Self { factories: Mutex::new(FxHashMap::default()), shutdown: CancellationToken::new(), resync }
    }

    fn factories(&self) -> MutexGuard<'_, FxHashMap<String, Factory>> {
        self.factories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached factory for `namespace`, built from `source` on first use.
    pub fn for_namespace(&self, source: Arc<dyn ListWatch>, namespace: &str) -> Factory {
        let mut factories = self.factories();
        factories
            .entry(namespace.to_string())
            .or_insert_with(|| {
                info!(ns = %namespace, "informer factory created");
                Factory::with_resync(source, namespace, self.shutdown.child_token(), self.resync)
            })
            .clone()
    }

    /// Like [`Factories::for_namespace`], but `None` means no caching: a
    /// fresh factory every call.
    pub fn resolve(factories: Option<&Factories>, source: Arc<dyn ListWatch>, namespace: &str) -> Factory {
        match factories {
            Some(f) => f.for_namespace(source, namespace),
            None => Factory::new(source, namespace, CancellationToken::new()),
        }
    }

    pub fn len(&self) -> usize { self.factories().len() }
    pub fn is_empty(&self) -> bool { self.factories().is_empty() }

    /// Stop every factory and forget them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.factories().clear();
        info!("informer factories shut down");
    }
}
