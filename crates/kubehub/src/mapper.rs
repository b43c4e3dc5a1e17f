//! Kind to resource mapping on top of discovery.

use std::sync::Arc;

use kube::api::Api;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;

use crate::discovery::DiscoveryClient;
use crate::gvr::{gvk_key, GroupVersionResource};
use crate::DiscoveryError;

/// Namespace used for namespaced kinds when the caller gives none.
pub const DEFAULT_NAMESPACE: &str = "default";

pub struct RestMapper<D> {
    discovery: Arc<D>,
}

impl<D> Clone for RestMapper<D> {
    fn clone(&self) -> Self { Self { discovery: self.discovery.clone() } }
}

impl<D: DiscoveryClient> RestMapper<D> {
    pub fn new(discovery: Arc<D>) -> Self { Self { discovery } }

    /// API resource and scope for `gvk`. Subresources (`pods/status`) are skipped.
    pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), DiscoveryError> {
        let gv = crate::gvr::group_version(&gvk.group, &gvk.version);
        let list = self.discovery.server_resources_for_group_version(&gv).await?;
        list.resources
            .iter()
            .find(|r| r.kind == gvk.kind && !r.name.contains('/'))
            .map(|r| (ApiResource::from_gvk_with_plural(gvk, &r.name), r.namespaced))
            .ok_or_else(|| DiscoveryError::NotFound(gvk_key(gvk)))
    }

    pub async fn gvr_for_gvk(&self, gvk: &GroupVersionKind) -> Result<GroupVersionResource, DiscoveryError> {
        let (ar, _) = self.resolve(gvk).await?;
        Ok(GroupVersionResource::new(ar.group, ar.version, ar.plural))
    }

    pub async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, DiscoveryError> {
        Ok(self.resolve(gvk).await?.1)
    }

    /// Dynamic API handle for `gvk`, scoped to `namespace` when the kind is namespaced.
    pub async fn resource_api(
        &self,
        client: Client,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, DiscoveryError> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        Ok(if namespaced {
            let ns = namespace.filter(|ns| !ns.is_empty()).unwrap_or(DEFAULT_NAMESPACE);
            Api::namespaced_with(client, ns, &ar)
        } else {
            Api::all_with(client, &ar)
        })
    }
}
