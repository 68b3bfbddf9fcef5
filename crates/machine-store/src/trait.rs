//! Store traits
//!
//! `ResourceStore` abstracts persistence of the provisioning resources so
//! reconcilers can run against the Kubernetes API or an in-memory mock.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::StoreError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Resource types the store can hold
pub trait StoredResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoredResource for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Versioned object store with optimistic concurrency
///
/// Every write compares `metadata.resourceVersion` with the stored object and
/// fails with [`StoreError::Conflict`] on mismatch. Callers re-read and
/// re-apply their change.
///
/// `namespace` is `None` for cluster-scoped kinds.
#[async_trait::async_trait]
pub trait ResourceStore<K: StoredResource>: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError>;

    /// List objects in a namespace, or across all namespaces with `None`
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError>;

    /// Create an object; fails if the name is taken
    async fn create(&self, object: &K) -> Result<K, StoreError>;

    /// Replace the object's spec and metadata; status is left untouched
    async fn replace(&self, object: &K) -> Result<K, StoreError>;

    /// Replace the object's status; spec is left untouched
    async fn replace_status(&self, object: &K) -> Result<K, StoreError>;

    /// Delete an object
    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;
}

/// Existence lookup for kinds this workspace does not define (e.g. `Cluster`)
#[async_trait::async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Fetch the object's metadata; `Ok(None)` when it does not exist
    async fn get_meta(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError>;
}

/// Name and namespace of an object about to be written
pub(crate) fn object_key<K: StoredResource>(object: &K) -> Result<(Option<String>, String), StoreError> {
    let meta = object.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} has no metadata.name", K::kind(&()))))?;
    Ok((meta.namespace.clone(), name))
}
