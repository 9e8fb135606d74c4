use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;
use serde::Serialize;

use crate::Result;
use crate::error::Error;

/// Kinds of objects the initializer knows how to mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    /// Deployment-like object with a pod template
    Workload,
    /// Ingress-like object with a class annotation
    Route,
    /// Service-like object with an exposure type
    Endpoint,
}

impl ResourceKind {
    /// Kubernetes kind name served by the API server
    pub const fn api_kind(self) -> &'static str {
        match self {
            Self::Workload => "Deployment",
            Self::Route => "Ingress",
            Self::Endpoint => "Service",
        }
    }

    /// API group serving the kind, empty for the core group
    pub const fn api_group(self) -> &'static str {
        match self {
            Self::Workload => "apps",
            Self::Route => "networking.k8s.io",
            Self::Endpoint => "",
        }
    }

    /// Resolves a Kubernetes group and kind, as found in admission requests
    ///
    /// Custom resources reusing a built-in kind name under another group are
    /// not recognised.
    pub fn from_group_kind(group: &str, kind: &str) -> Option<Self> {
        match (group, kind) {
            ("apps", "Deployment") => Some(Self::Workload),
            ("networking.k8s.io", "Ingress") => Some(Self::Route),
            ("", "Service") => Some(Self::Endpoint),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_kind())
    }
}

/// Identity of a managed object
///
/// Never changed by a mutation; patches are addressed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A cluster object subject to policy-driven mutation
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedResource {
    Workload(Deployment),
    Route(Ingress),
    Endpoint(Service),
}

impl ManagedResource {
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Workload(_) => ResourceKind::Workload,
            Self::Route(_) => ResourceKind::Route,
            Self::Endpoint(_) => ResourceKind::Endpoint,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Workload(d) => &d.metadata,
            Self::Route(i) => &i.metadata,
            Self::Endpoint(s) => &s.metadata,
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Workload(d) => &mut d.metadata,
            Self::Route(i) => &mut i.metadata,
            Self::Endpoint(s) => &mut s.metadata,
        }
    }

    /// Namespace the object lives in, empty when unset
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    /// Address of the object in the store
    pub fn key(&self) -> Result<ObjectKey> {
        let meta = self.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| Error::InvalidObject(format!("{} without metadata.name", self.kind())))?;
        let namespace = meta
            .namespace
            .clone()
            .ok_or_else(|| {
                Error::InvalidObject(format!("{} {name} without metadata.namespace", self.kind()))
            })?;

        Ok(ObjectKey {
            kind: self.kind(),
            namespace,
            name,
        })
    }

    /// Whether the object is on its way out of the cluster
    pub fn is_terminating(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.meta()
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(key))
    }

    /// Field-named representation used for diffing
    pub fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::Workload(d) => serde_json::to_value(d),
            Self::Route(i) => serde_json::to_value(i),
            Self::Endpoint(s) => serde_json::to_value(s),
        }?;
        Ok(value)
    }

    /// Parses an untyped object of the given kind
    pub fn from_value(kind: ResourceKind, value: serde_json::Value) -> Result<Self> {
        let resource = match kind {
            ResourceKind::Workload => Self::Workload(serde_json::from_value(value)?),
            ResourceKind::Route => Self::Route(serde_json::from_value(value)?),
            ResourceKind::Endpoint => Self::Endpoint(serde_json::from_value(value)?),
        };
        Ok(resource)
    }
}

impl From<Deployment> for ManagedResource {
    fn from(value: Deployment) -> Self {
        Self::Workload(value)
    }
}

impl From<Ingress> for ManagedResource {
    fn from(value: Ingress) -> Self {
        Self::Route(value)
    }
}

impl From<Service> for ManagedResource {
    fn from(value: Service) -> Self {
        Self::Endpoint(value)
    }
}
