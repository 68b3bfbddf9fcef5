//! In-memory store for unit testing
//!
//! Mirrors the API server's write semantics closely enough for reconciler
//! tests: resource versions are bumped on every write, stale versions are
//! rejected, `replace` keeps the stored status and `replace_status` keeps the
//! stored spec.

use crate::error::StoreError;
use crate::store_trait::{object_key, MetadataLookup, ResourceStore, StoredResource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (Option<String>, String);

/// Mock store for testing
#[derive(Debug, Clone)]
pub struct MockResourceStore<K> {
    objects: Arc<Mutex<BTreeMap<ObjectKey, K>>>,
    next_version: Arc<AtomicU64>,
    pending_conflicts: Arc<AtomicUsize>,
    status_writes: Arc<AtomicUsize>,
}

impl<K: StoredResource> Default for MockResourceStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoredResource> MockResourceStore<K> {
    /// Empty store; resource versions start at 1
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            next_version: Arc::new(AtomicU64::new(1)),
            pending_conflicts: Arc::new(AtomicUsize::new(0)),
            status_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<ObjectKey, K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, object: &mut K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        object.meta_mut().resource_version = Some(version.to_string());
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Add an object directly (for test setup), overwriting any existing one
    pub fn insert(&self, mut object: K) -> K {
        self.stamp(&mut object);
        let meta = object.meta();
        let key = (meta.namespace.clone(), meta.name.clone().unwrap_or_default());
        self.objects().insert(key, object.clone());
        object
    }

    /// Remove an object directly, as if its deletion completed
    pub fn remove(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.objects()
            .remove(&(namespace.map(str::to_string), name.to_string()))
    }

    /// Current stored copy of an object
    pub fn object(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.objects()
            .get(&(namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    /// Set `deletionTimestamp`, as the API server does for objects held by finalizers
    pub fn mark_deleting(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let mut objects = self.objects();
        let key = (namespace.map(str::to_string), name.to_string());
        let stored = objects.get(&key).ok_or_else(|| not_found::<K>(name))?;

        let mut value = serde_json::to_value(stored)?;
        value["metadata"]["deletionTimestamp"] =
            Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        let mut updated: K = serde_json::from_value(value)?;
        self.stamp(&mut updated);
        objects.insert(key, updated);
        Ok(())
    }

    /// Bump an object's resource version, simulating a concurrent writer
    pub fn touch(&self, namespace: Option<&str>, name: &str) {
        let mut objects = self.objects();
        if let Some(object) = objects.get_mut(&(namespace.map(str::to_string), name.to_string())) {
            let version = self.next_version.fetch_add(1, Ordering::SeqCst);
            object.meta_mut().resource_version = Some(version.to_string());
        }
    }

    /// Make the next `count` writes fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful `replace_status` calls so far
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Validate a write against the stored copy and return the stored copy
    fn check_write(&self, objects: &BTreeMap<ObjectKey, K>, object: &K) -> Result<(ObjectKey, K), StoreError> {
        let (namespace, name) = object_key(object)?;
        let key = (namespace, name.clone());
        let stored = objects.get(&key).cloned().ok_or_else(|| not_found::<K>(&name))?;

        let conflict = || StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            name: name.clone(),
        };
        if self.take_injected_conflict() {
            return Err(conflict());
        }
        let stale = object
            .meta()
            .resource_version
            .as_ref()
            .is_some_and(|version| stored.meta().resource_version.as_ref() != Some(version));
        if stale {
            return Err(conflict());
        }
        Ok((key, stored))
    }
}

fn not_found<K: StoredResource>(name: &str) -> StoreError {
    StoreError::NotFound {
        kind: K::kind(&()).to_string(),
        name: name.to_string(),
    }
}

/// Copy of `target` carrying the `status` of `source`
fn with_status_of<K: StoredResource>(target: &K, source: &K) -> Result<K, StoreError> {
    let mut value = serde_json::to_value(target)?;
    let status = serde_json::to_value(source)?.get("status").cloned();
    if let Some(map) = value.as_object_mut() {
        match status {
            Some(status) => map.insert("status".to_string(), status),
            None => map.remove("status"),
        };
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait::async_trait]
impl<K: StoredResource> ResourceStore<K> for MockResourceStore<K> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.object(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        Ok(self
            .objects()
            .iter()
            .filter(|((ns, _), _)| namespace.is_none() || ns.as_deref() == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        let mut objects = self.objects();
        let key = (namespace, name.clone());
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                name,
            });
        }
        let mut created = object.clone();
        self.stamp(&mut created);
        objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let mut objects = self.objects();
        let (key, stored) = self.check_write(&objects, object)?;
        let mut updated = with_status_of(object, &stored)?;
        self.stamp(&mut updated);
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn replace_status(&self, object: &K) -> Result<K, StoreError> {
        let mut objects = self.objects();
        let (key, stored) = self.check_write(&objects, object)?;
        let mut updated = with_status_of(&stored, object)?;
        self.stamp(&mut updated);
        objects.insert(key, updated.clone());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        self.remove(namespace, name)
            .map(|_| ())
            .ok_or_else(|| not_found::<K>(name))
    }
}

/// Mock `Cluster` lookup for testing
#[derive(Debug, Clone, Default)]
pub struct MockClusterLookup {
    clusters: Arc<Mutex<BTreeMap<String, ObjectMeta>>>,
}

impl MockClusterLookup {
    /// Lookup with no clusters
    pub fn new() -> Self {
        Self::default()
    }

    fn clusters(&self) -> MutexGuard<'_, BTreeMap<String, ObjectMeta>> {
        self.clusters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a cluster (for test setup)
    pub fn add_cluster(&self, name: &str) {
        self.clusters().insert(
            name.to_string(),
            ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
        );
    }

    /// Add a cluster with explicit metadata (e.g. a deletion timestamp)
    pub fn add_cluster_meta(&self, meta: ObjectMeta) {
        let name = meta.name.clone().unwrap_or_default();
        self.clusters().insert(name, meta);
    }

    pub fn remove_cluster(&self, name: &str) {
        self.clusters().remove(name);
    }
}

#[async_trait::async_trait]
impl MetadataLookup for MockClusterLookup {
    async fn get_meta(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.clusters().get(name).cloned())
    }
}
