//! Reference resolution.
//!
//! Reference fields are plain names. Every call looks the target up again;
//! nothing is cached between passes, so a reference that was valid on one
//! pass can come back `NotFound` on the next.
//!
//! A missing or terminating target is a normal outcome, returned as a
//! [`Resolution`]. Only store failures are errors.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use machine_crds::{Machine, MachineDriver, MachineTemplate};
use machine_store::{MetadataLookup, ResourceStore, StoreError};
use tracing::debug;

/// Outcome of resolving one reference
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Target exists and is usable
    Found(T),
    /// No target with that name (or no name given)
    NotFound,
    /// Target exists but is being deleted
    NotReady(String),
}

impl<T> Resolution<T> {
    fn from_lookup(found: Option<T>, deleting: impl Fn(&T) -> bool, describe: impl Fn() -> String) -> Self {
        match found {
            None => Self::NotFound,
            Some(target) if deleting(&target) => Self::NotReady(format!("{} is being deleted", describe())),
            Some(target) => Self::Found(target),
        }
    }
}

/// Looks up the targets of reference fields
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    templates: &'a dyn ResourceStore<MachineTemplate>,
    drivers: &'a dyn ResourceStore<MachineDriver>,
    clusters: &'a dyn MetadataLookup,
}

impl<'a> Resolver<'a> {
    pub fn new(
        templates: &'a dyn ResourceStore<MachineTemplate>,
        drivers: &'a dyn ResourceStore<MachineDriver>,
        clusters: &'a dyn MetadataLookup,
    ) -> Self {
        Self {
            templates,
            drivers,
            clusters,
        }
    }

    /// Resolve `spec.machineTemplateName` in the machine's namespace
    pub async fn machine_template(&self, machine: &Machine) -> Result<Resolution<MachineTemplate>, StoreError> {
        let Some(reference) = machine.template_ref() else {
            return Ok(Resolution::NotFound);
        };
        debug!("Resolving {}", reference);
        let found = self
            .templates
            .get(reference.namespace.as_deref(), &reference.name)
            .await?;
        Ok(Resolution::from_lookup(
            found,
            |t| t.metadata.deletion_timestamp.is_some(),
            || reference.to_string(),
        ))
    }

    /// Resolve a MachineDriver by name
    pub async fn driver(&self, name: &str) -> Result<Resolution<MachineDriver>, StoreError> {
        if name.is_empty() {
            return Ok(Resolution::NotFound);
        }
        let found = self.drivers.get(None, name).await?;
        Ok(Resolution::from_lookup(
            found,
            |d| d.metadata.deletion_timestamp.is_some(),
            || format!("MachineDriver/{name}"),
        ))
    }

    /// Resolve a Cluster by name (existence only)
    pub async fn cluster(&self, name: &str) -> Result<Resolution<ObjectMeta>, StoreError> {
        if name.is_empty() {
            return Ok(Resolution::NotFound);
        }
        let found = self.clusters.get_meta(name).await?;
        Ok(Resolution::from_lookup(
            found,
            |meta| meta.deletion_timestamp.is_some(),
            || format!("Cluster/{name}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use machine_store::{MockClusterLookup, MockResourceStore};

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let templates = MockResourceStore::<MachineTemplate>::new();
        let drivers = MockResourceStore::<MachineDriver>::new();
        let clusters = MockClusterLookup::new();
        let resolver = Resolver::new(&templates, &drivers, &clusters);

        let resolution = resolver.machine_template(&test_machine("m-1", "tpl-a", "")).await.unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_empty_template_name_is_not_found() {
        let templates = MockResourceStore::<MachineTemplate>::new();
        templates.insert(test_template("tpl-a", "amazonec2"));
        let drivers = MockResourceStore::<MachineDriver>::new();
        let clusters = MockClusterLookup::new();
        let resolver = Resolver::new(&templates, &drivers, &clusters);

        let resolution = resolver.machine_template(&test_machine("m-1", "", "")).await.unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_template_resolved_in_machine_namespace() {
        let templates = MockResourceStore::<MachineTemplate>::new();
        let mut elsewhere = test_template("tpl-a", "amazonec2");
        elsewhere.metadata.namespace = Some("other".to_string());
        templates.insert(elsewhere);
        let drivers = MockResourceStore::<MachineDriver>::new();
        let clusters = MockClusterLookup::new();
        let resolver = Resolver::new(&templates, &drivers, &clusters);

        let machine = test_machine("m-1", "tpl-a", "");
        assert_eq!(resolver.machine_template(&machine).await.unwrap(), Resolution::NotFound);

        templates.insert(test_template("tpl-a", "amazonec2"));
        assert!(matches!(
            resolver.machine_template(&machine).await.unwrap(),
            Resolution::Found(t) if t.metadata.namespace.as_deref() == Some(TEST_NAMESPACE)
        ));
    }

    #[tokio::test]
    async fn test_terminating_targets_are_not_ready() {
        let templates = MockResourceStore::<MachineTemplate>::new();
        let drivers = MockResourceStore::<MachineDriver>::new();
        drivers.insert(test_driver("amazonec2", true));
        drivers.mark_deleting(None, "amazonec2").unwrap();
        let clusters = MockClusterLookup::new();
        clusters.add_cluster_meta(ObjectMeta {
            name: Some("c-1".to_string()),
            deletion_timestamp: Some(test_time()),
            ..Default::default()
        });
        let resolver = Resolver::new(&templates, &drivers, &clusters);

        assert!(matches!(
            resolver.driver("amazonec2").await.unwrap(),
            Resolution::NotReady(reason) if reason.contains("MachineDriver/amazonec2")
        ));
        assert!(matches!(resolver.cluster("c-1").await.unwrap(), Resolution::NotReady(_)));
    }

    #[tokio::test]
    async fn test_lookup_is_fresh_each_call() {
        let templates = MockResourceStore::<MachineTemplate>::new();
        let drivers = MockResourceStore::<MachineDriver>::new();
        drivers.insert(test_driver("amazonec2", true));
        let clusters = MockClusterLookup::new();
        let resolver = Resolver::new(&templates, &drivers, &clusters);

        assert!(matches!(resolver.driver("amazonec2").await.unwrap(), Resolution::Found(_)));
        drivers.remove(None, "amazonec2");
        assert_eq!(resolver.driver("amazonec2").await.unwrap(), Resolution::NotFound);
    }
}
