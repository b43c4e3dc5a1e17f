//! Read-side discovery client and its in-memory cache.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroup, APIGroupList, APIResourceList, GroupVersionForDiscovery};
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::DiscoveryError;

/// The discovery calls the engine relies on.
///
/// `server_resources` and `server_preferred_resources` are derived from the
/// two primitive lookups unless an implementation overrides them.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// All served groups; the core group comes first with an empty name.
    async fn server_groups(&self) -> Result<APIGroupList, DiscoveryError>;
    async fn server_resources_for_group_version(&self, gv: &str) -> Result<APIResourceList, DiscoveryError>;
    /// Legacy per-group-version swagger document.
    async fn swagger_schema(&self, gv: &str) -> Result<Arc<Value>, DiscoveryError>;
    /// The aggregated OpenAPI v2 document.
    async fn openapi_schema(&self) -> Result<Arc<Value>, DiscoveryError>;
    async fn server_version(&self) -> Result<Info, DiscoveryError>;

    /// Resource lists for every served group version.
    async fn server_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        let groups = self.server_groups().await?;
        let mut out = Vec::new();
        for g in &groups.groups {
            for v in &g.versions {
                out.push(self.server_resources_for_group_version(&v.group_version).await?);
            }
        }
        Ok(out)
    }

    /// Resource lists for the preferred version of every group.
    async fn server_preferred_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        let groups = self.server_groups().await?;
        let mut out = Vec::new();
        for g in &groups.groups {
            let Some(pv) = g.preferred_version.as_ref().or_else(|| g.versions.first()) else { continue };
            out.push(self.server_resources_for_group_version(&pv.group_version).await?);
        }
        Ok(out)
    }
}

/// Discovery straight against the API server.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self { Self { client } }

    async fn get_json(&self, path: &str) -> Result<Value, DiscoveryError> {
        let req = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;
        Ok(self.client.request::<Value>(req).await?)
    }
}

fn validate_gv(gv: &str) -> Result<(), DiscoveryError> {
    let ok = match gv.split_once('/') {
        Some((g, v)) => !g.is_empty() && !v.is_empty() && !v.contains('/'),
        None => !gv.is_empty(),
    };
    if ok { Ok(()) } else { Err(DiscoveryError::InvalidGroupVersion(gv.to_string())) }
}

#[async_trait]
impl DiscoveryClient for KubeDiscovery {
    async fn server_groups(&self) -> Result<APIGroupList, DiscoveryError> {
        let core = self.client.list_core_api_versions().await?;
        let mut list = self.client.list_api_groups().await?;
        if !core.versions.is_empty() {
            let versions: Vec<_> = core
                .versions
                .iter()
                .map(|v| GroupVersionForDiscovery { group_version: v.clone(), version: v.clone() })
                .collect();
            let core_group = APIGroup {
                name: String::new(),
                preferred_version: versions.first().cloned(),
                versions,
                ..Default::default()
            };
            list.groups.insert(0, core_group);
        }
        Ok(list)
    }

    async fn server_resources_for_group_version(&self, gv: &str) -> Result<APIResourceList, DiscoveryError> {
        validate_gv(gv)?;
        let list = if gv.contains('/') {
            self.client.list_api_group_resources(gv).await?
        } else {
            self.client.list_core_api_resources(gv).await?
        };
        if list.resources.is_empty() {
            return Err(DiscoveryError::EmptyGroupVersion(gv.to_string()));
        }
        Ok(list)
    }

    async fn swagger_schema(&self, gv: &str) -> Result<Arc<Value>, DiscoveryError> {
        validate_gv(gv)?;
        let path = if gv.contains('/') { format!("/swaggerapi/apis/{gv}") } else { format!("/swaggerapi/api/{gv}") };
        self.get_json(&path).await.map(Arc::new)
    }

    async fn openapi_schema(&self) -> Result<Arc<Value>, DiscoveryError> {
        self.get_json("/openapi/v2").await.map(Arc::new)
    }

    async fn server_version(&self) -> Result<Info, DiscoveryError> {
        Ok(self.client.apiserver_version().await?)
    }
}

#[derive(Default)]
struct Slots {
    groups: Option<APIGroupList>,
    resources: FxHashMap<String, APIResourceList>,
    swagger: FxHashMap<String, Arc<Value>>,
    openapi: Option<Arc<Value>>,
}

/// Memoizing wrapper around a [`DiscoveryClient`].
///
/// Every cached lookup holds the write lock across its fetch, so at most one
/// fetch per process is in flight and concurrent callers wait for it. Only
/// successful responses are stored. Derived and version lookups always go to
/// the delegate.
pub struct CachedDiscovery<D> {
    delegate: D,
    slots: RwLock<Slots>,
}

fn hit(slot: &'static str) { counter!("discovery_cache_hits_total", 1u64, "slot" => slot); }
fn miss(slot: &'static str) { counter!("discovery_cache_misses_total", 1u64, "slot" => slot); }

impl<D: DiscoveryClient> CachedDiscovery<D> {
    pub fn new(delegate: D) -> Self { Self { delegate, slots: RwLock::new(Slots::default()) } }

    pub fn delegate(&self) -> &D { &self.delegate }

    /// Drop every cached slot; the next lookups refetch.
    pub async fn invalidate(&self) {
        *self.slots.write().await = Slots::default();
        info!("discovery cache invalidated");
    }

    /// Populated-since-invalidation is the only notion of freshness here.
    pub fn fresh(&self) -> bool { true }
}

#[async_trait]
impl<D: DiscoveryClient> DiscoveryClient for CachedDiscovery<D> {
    async fn server_groups(&self) -> Result<APIGroupList, DiscoveryError> {
        let mut slots = self.slots.write().await;
        if let Some(g) = &slots.groups {
            hit("groups");
            return Ok(g.clone());
        }
        miss("groups");
        let groups = self.delegate.server_groups().await?;
        debug!(count = groups.groups.len(), "cached server groups");
        slots.groups = Some(groups.clone());
        Ok(groups)
    }

    async fn server_resources_for_group_version(&self, gv: &str) -> Result<APIResourceList, DiscoveryError> {
        let mut slots = self.slots.write().await;
        if let Some(r) = slots.resources.get(gv) {
            hit("resources");
            return Ok(r.clone());
        }
        miss("resources");
        let list = self.delegate.server_resources_for_group_version(gv).await?;
        debug!(gv = %gv, count = list.resources.len(), "cached resource list");
        slots.resources.insert(gv.to_string(), list.clone());
        Ok(list)
    }

    async fn swagger_schema(&self, gv: &str) -> Result<Arc<Value>, DiscoveryError> {
        let mut slots = self.slots.write().await;
        if let Some(doc) = slots.swagger.get(gv) {
            hit("swagger");
            return Ok(doc.clone());
        }
        miss("swagger");
        let doc = self.delegate.swagger_schema(gv).await?;
        slots.swagger.insert(gv.to_string(), doc.clone());
        Ok(doc)
    }

    async fn openapi_schema(&self) -> Result<Arc<Value>, DiscoveryError> {
        let mut slots = self.slots.write().await;
        if let Some(doc) = &slots.openapi {
            hit("openapi");
            return Ok(doc.clone());
        }
        miss("openapi");
        let doc = self.delegate.openapi_schema().await?;
        slots.openapi = Some(doc.clone());
        Ok(doc)
    }

    async fn server_version(&self) -> Result<Info, DiscoveryError> { self.delegate.server_version().await }

    async fn server_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        self.delegate.server_resources().await
    }

    async fn server_preferred_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        self.delegate.server_preferred_resources().await
    }
}

#[async_trait]
impl<D: DiscoveryClient + ?Sized> DiscoveryClient for Arc<D> {
    async fn server_groups(&self) -> Result<APIGroupList, DiscoveryError> { (**self).server_groups().await }
    async fn server_resources_for_group_version(&self, gv: &str) -> Result<APIResourceList, DiscoveryError> {
        (**self).server_resources_for_group_version(gv).await
    }
    async fn swagger_schema(&self, gv: &str) -> Result<Arc<Value>, DiscoveryError> { (**self).swagger_schema(gv).await }
    async fn openapi_schema(&self) -> Result<Arc<Value>, DiscoveryError> { (**self).openapi_schema().await }
    async fn server_version(&self) -> Result<Info, DiscoveryError> { (**self).server_version().await }
    async fn server_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        (**self).server_resources().await
    }
    async fn server_preferred_resources(&self) -> Result<Vec<APIResourceList>, DiscoveryError> {
        (**self).server_preferred_resources().await
    }
}
