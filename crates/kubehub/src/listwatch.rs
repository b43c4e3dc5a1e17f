//! Event sources for shared informers.

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;

use crate::gvr::GroupVersionResource;

pub type EventStream = BoxStream<'static, Result<watcher::Event<DynamicObject>, watcher::Error>>;

/// Something that can list and then watch one resource type.
///
/// The stream is expected to relist (`Restarted`) after every reconnect and
/// never to end on its own.
pub trait ListWatch: Send + Sync + 'static {
    /// `namespace = None` (or empty) watches across all namespaces.
    fn list_watch(&self, gvr: &GroupVersionResource, namespace: Option<&str>) -> EventStream;
}

impl ListWatch for Client {
    fn list_watch(&self, gvr: &GroupVersionResource, namespace: Option<&str>) -> EventStream {
        let ar = gvr.api_resource();
        let api: Api<DynamicObject> = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(self.clone(), ns, &ar),
            None => Api::all_with(self.clone(), &ar),
        };
        watcher::watcher(api, watcher::Config::default()).default_backoff().boxed()
    }
}
