use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::patch::PatchDocument;
use crate::resource::{ObjectKey, ResourceKind};

/// Authoritative object state that accepts partial updates
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Applies `patch` to the object at `key`
    ///
    /// Fails with `StoreConflict` when the patch's preconditions no longer hold,
    /// `StoreNotFound` when the object is gone and `StoreUnavailable` when the
    /// store cannot be reached.
    async fn patch(&self, key: &ObjectKey, patch: &PatchDocument) -> Result<()>;
}

/// Object store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn patch_as<K>(&self, key: &ObjectKey, patch: &PatchDocument) -> kube::Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };

        api.patch(&key.name, &params, &Patch::Strategic(patch)).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn patch(&self, key: &ObjectKey, patch: &PatchDocument) -> Result<()> {
        let result = match key.kind {
            ResourceKind::Workload => self.patch_as::<Deployment>(key, patch).await,
            ResourceKind::Route => self.patch_as::<Ingress>(key, patch).await,
            ResourceKind::Endpoint => self.patch_as::<Service>(key, patch).await,
        };

        result.map_err(|err| Error::from_store(key, err))
    }
}
