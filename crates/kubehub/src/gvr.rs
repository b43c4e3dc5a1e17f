//! Resource type identities.

use std::fmt;

use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

use crate::DiscoveryError;

/// Group/version/resource triple; `Default` is the unset value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.version.is_empty() && self.resource.is_empty()
    }

    /// `v1` for the core group, `apps/v1` otherwise.
    pub fn group_version(&self) -> String { group_version(&self.group, &self.version) }

    /// Parse `v1/pods` or `apps/v1/deployments`.
    pub fn parse(key: &str) -> Result<Self, DiscoveryError> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [v, r] if !v.is_empty() && !r.is_empty() => Ok(Self::new("", *v, *r)),
            [g, v, r] if !g.is_empty() && !v.is_empty() && !r.is_empty() => Ok(Self::new(*g, *v, *r)),
            _ => Err(DiscoveryError::InvalidKey(format!("{key} (expect v1/resource or group/v1/resource)"))),
        }
    }

    /// Dynamic API resource for list/watch; the kind is not known from a GVR alone.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.group_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

pub(crate) fn group_version(group: &str, version: &str) -> String {
    if group.is_empty() { version.to_string() } else { format!("{group}/{version}") }
}

/// Parse `v1/Kind` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, DiscoveryError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(DiscoveryError::InvalidKey(format!("{key} (expect v1/Kind or group/v1/Kind)"))),
    }
}

pub(crate) fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}", group_version(&gvk.group, &gvk.version), gvk.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_grouped_keys() {
        let core = GroupVersionResource::parse("v1/pods").unwrap();
        assert_eq!(core, GroupVersionResource::new("", "v1", "pods"));
        assert_eq!(core.group_version(), "v1");
        assert_eq!(core.to_string(), "v1/pods");

        let apps = GroupVersionResource::parse("apps/v1/deployments").unwrap();
        assert_eq!(apps.group_version(), "apps/v1");
        assert_eq!(apps.api_resource().plural, "deployments");
        assert!(GroupVersionResource::parse("pods").is_err());
        assert!(GroupVersionResource::parse("apps//x").is_err());
    }

    #[test]
    fn default_is_empty() {
        assert!(GroupVersionResource::default().is_empty());
        assert!(!GroupVersionResource::new("", "v1", "pods").is_empty());
    }

    #[test]
    fn gvk_keys() {
        let gvk = parse_gvk_key("apps/v1/Deployment").unwrap();
        assert_eq!((gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()), ("apps", "v1", "Deployment"));
        assert_eq!(gvk_key(&gvk), "apps/v1/Deployment");
        assert_eq!(gvk_key(&parse_gvk_key("v1/Pod").unwrap()), "v1/Pod");
        assert!(parse_gvk_key("a/b/c/d").is_err());
    }
}
