//! Reconciliation logic for the provisioning CRDs.
//!
//! One pass per object, split by kind:
//! - `machine`: template, cluster and driver resolution, snapshot capture,
//!   optional provisioning
//! - `machine_template`: driver resolution
//! - `machine_driver`: source validation and activation
//!
//! A pass computes the new status in memory and writes it once through the
//! store. A stale `resourceVersion` re-reads the object and runs the pass
//! again.

pub mod machine;
pub mod machine_driver;
#[cfg(test)]
mod machine_driver_test;
pub mod machine_template;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::provisioner::Provisioner;
use crate::resolver::Resolver;
use kube::Resource;
use kube_runtime::controller::Action;
use machine_crds::{Machine, MachineDriver, MachineTemplate};
use machine_store::{MetadataLookup, ResourceStore, StoredResource};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts per pass before a conflict is reported as a fault
pub(crate) const CONFLICT_ATTEMPTS: u32 = 3;

/// Requeue interval for steady machines and templates
pub(crate) const RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Where a pass left the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the object or a reference changes
    Steady,
    /// A reference is unresolved; check again later
    Waiting,
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    wait_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            wait_count: 0,
        }
    }
}

/// Reconciles Machine, MachineTemplate and MachineDriver resources.
pub struct Reconciler {
    pub(crate) machines: Arc<dyn ResourceStore<Machine>>,
    pub(crate) templates: Arc<dyn ResourceStore<MachineTemplate>>,
    pub(crate) drivers: Arc<dyn ResourceStore<MachineDriver>>,
    pub(crate) clusters: Arc<dyn MetadataLookup>,
    /// Without one, machines stop at `Provisioned`
    pub(crate) provisioner: Option<Arc<dyn Provisioner>>,
    /// Waiting passes per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("provisioner", &self.provisioner.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        machines: Arc<dyn ResourceStore<Machine>>,
        templates: Arc<dyn ResourceStore<MachineTemplate>>,
        drivers: Arc<dyn ResourceStore<MachineDriver>>,
        clusters: Arc<dyn MetadataLookup>,
    ) -> Self {
        Self {
            machines,
            templates,
            drivers,
            clusters,
            provisioner: None,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drive provisioned machines through `provisioner`
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub(crate) fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.templates.as_ref(), self.drivers.as_ref(), self.clusters.as_ref())
    }

    /// Run `pass` against `object`, re-reading and re-running on conflict
    ///
    /// An object deleted between attempts ends the pass quietly.
    pub(crate) async fn retry_on_conflict<K, F, Fut>(
        &self,
        store: &dyn ResourceStore<K>,
        kind: &'static str,
        object: K,
        mut pass: F,
    ) -> Result<Outcome, ControllerError>
    where
        K: StoredResource,
        F: FnMut(K) -> Fut,
        Fut: Future<Output = Result<Outcome, ControllerError>>,
    {
        let namespace = object.meta().namespace.clone();
        let name = object.meta().name.clone().unwrap_or_default();
        let key = resource_key(&object);
        let mut current = object;

        for attempt in 1..=CONFLICT_ATTEMPTS {
            match pass(current).await {
                Err(ControllerError::Store(e)) if e.is_retryable() => {
                    warn!(
                        "Conflict writing {} {} (attempt {}/{}): {}",
                        kind, name, attempt, CONFLICT_ATTEMPTS, e
                    );
                    if attempt == CONFLICT_ATTEMPTS {
                        break;
                    }
                    match store.get(namespace.as_deref(), &name).await? {
                        Some(latest) => current = latest,
                        None => {
                            debug!("{} {} is gone, nothing to reconcile", kind, name);
                            self.reset_backoff(&key);
                            return Ok(Outcome::Steady);
                        }
                    }
                }
                result => return result,
            }
        }

        Err(ControllerError::ConflictRetriesExhausted {
            kind,
            name,
            attempts: CONFLICT_ATTEMPTS,
        })
    }

    /// Turn a pass outcome into a requeue decision
    ///
    /// Waiting resources back off along the Fibonacci sequence; a steady
    /// pass resets the sequence and requeues after `resync`, or only on
    /// change when `resync` is `None`.
    pub fn action_for(&self, resource_key: &str, outcome: Outcome, resync: Option<Duration>) -> Action {
        match outcome {
            Outcome::Waiting => {
                let (delay, wait_count) = self.next_backoff(resource_key);
                debug!(
                    "{} waiting on references (pass {}), requeue in {}s",
                    resource_key,
                    wait_count,
                    delay.as_secs()
                );
                Action::requeue(delay)
            }
            Outcome::Steady => {
                self.reset_backoff(resource_key);
                resync.map_or_else(Action::await_change, Action::requeue)
            }
        }
    }

    /// Next backoff delay for a resource, advancing its sequence
    ///
    /// Returns (delay, waiting passes so far)
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.wait_count += 1;
                (state.backoff.next_backoff(), state.wait_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Forget the backoff sequence of a resource
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}

/// Backoff key for an object: `Kind/namespace/name`, namespace omitted when cluster-scoped
pub fn resource_key<K: Resource<DynamicType = ()>>(object: &K) -> String {
    let meta = object.meta();
    resource_key_for::<K>(meta.namespace.as_deref(), meta.name.as_deref().unwrap_or("<unknown>"))
}

/// Backoff key for a `K` known only by name
pub fn resource_key_for<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{}/{}/{}", K::kind(&()), namespace, name),
        None => format!("{}/{}", K::kind(&()), name),
    }
}
