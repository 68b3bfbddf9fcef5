//! Kubernetes-backed store
//!
//! Optimistic concurrency is delegated to the API server: writes carry the
//! object's `metadata.resourceVersion` and a stale version comes back as
//! HTTP 409.

use crate::error::StoreError;
use crate::store_trait::{object_key, MetadataLookup, ResourceStore, StoredResource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::{Client, Resource};
use std::fmt;
use tracing::debug;

/// Store backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    api_for: fn(Client, Option<&str>) -> Api<K>,
}

impl<K: StoredResource> fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &K::kind(&()))
            .finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: StoredResource + Resource<Scope = NamespaceResourceScope>,
{
    /// Store for a namespaced kind
    pub fn namespaced(client: Client) -> Self {
        Self {
            client,
            api_for: |client, namespace| match namespace {
                Some(ns) => Api::namespaced(client, ns),
                None => Api::all(client),
            },
        }
    }
}

impl<K> KubeStore<K>
where
    K: StoredResource + Resource<Scope = ClusterResourceScope>,
{
    /// Store for a cluster-scoped kind
    pub fn cluster(client: Client) -> Self {
        Self {
            client,
            api_for: |client, _| Api::all(client),
        }
    }
}

impl<K: StoredResource> KubeStore<K> {
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        (self.api_for)(self.client.clone(), namespace)
    }
}

/// Map a kube error for `name`, turning 404/409 into store semantics
fn map_error<K: StoredResource>(err: kube::Error, name: &str, creating: bool) -> StoreError {
    let kind = K::kind(&()).to_string();
    let name = name.to_string();
    match err {
        kube::Error::Api(e) if e.code == 404 => StoreError::NotFound { kind, name },
        kube::Error::Api(e) if e.code == 409 && creating => StoreError::AlreadyExists { kind, name },
        kube::Error::Api(e) if e.code == 409 => StoreError::Conflict { kind, name },
        other => StoreError::Kube(other),
    }
}

/// Body of a PUT to the status subresource
///
/// The whole object is sent, so status fields missing from `object` are
/// cleared on the server. `metadata.resourceVersion` makes the write
/// conditional.
fn status_body<K: StoredResource>(object: &K) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(object)?)
}

#[async_trait::async_trait]
impl<K: StoredResource> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error::<K>(e, name, false))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        debug!("Creating {} {}", K::kind(&()), name);
        self.api(namespace.as_deref())
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error::<K>(e, &name, true))
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        debug!("Replacing {} {}", K::kind(&()), name);
        self.api(namespace.as_deref())
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_error::<K>(e, &name, false))
    }

    async fn replace_status(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        debug!("Writing status of {} {}", K::kind(&()), name);
        self.api(namespace.as_deref())
            .replace_status(&name, &PostParams::default(), status_body(object)?)
            .await
            .map_err(|e| map_error::<K>(e, &name, false))
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        debug!("Deleting {} {}", K::kind(&()), name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error::<K>(e, name, false))?;
        Ok(())
    }
}

/// Existence lookup for `management.cattle.io/v3` `Cluster` objects
///
/// Clusters are defined elsewhere, so they are read as dynamic objects and
/// only their metadata is used.
pub struct KubeClusterLookup {
    api: Api<DynamicObject>,
}

impl fmt::Debug for KubeClusterLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterLookup").finish_non_exhaustive()
    }
}

impl KubeClusterLookup {
    /// Lookup over all `Cluster` objects visible to `client`
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(machine_crds::API_GROUP, "v3", "Cluster");
        let resource = ApiResource::from_gvk(&gvk);
        Self {
            api: Api::all_with(client, &resource),
        }
    }
}

#[async_trait::async_trait]
impl MetadataLookup for KubeClusterLookup {
    async fn get_meta(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let cluster = self.api.get_opt(name).await?;
        Ok(cluster.map(|cluster| cluster.metadata))
    }
}
