//! Test utilities for unit testing reconcilers
//!
//! Builders for test resources, a scripted provisioner, and a reconciler
//! wired to in-memory stores.

use crate::provisioner::{NodeObservation, ProvisionError, ProvisionRequest, ProvisionedNode, Provisioner};
use crate::reconciler::Reconciler;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use machine_crds::{
    Machine, MachineDriver, MachineDriverSpec, MachineSpec, MachineTemplate, MachineTemplateSpec, RkeConfigNode,
};
use machine_store::{MockClusterLookup, MockResourceStore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Namespace used by all namespaced test resources
pub const TEST_NAMESPACE: &str = "fleet";

/// Fixed timestamp for metadata fields
pub fn test_time() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
}

/// Machine in [`TEST_NAMESPACE`] referencing `template` and `cluster`
pub fn test_machine(name: &str, template: &str, cluster: &str) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            requested_hostname: format!("{name}.fleet.internal"),
            requested_cluster_name: cluster.to_string(),
            requested_roles: vec!["worker".to_string()],
            machine_template_name: template.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Template in [`TEST_NAMESPACE`] selecting `driver`
pub fn test_template(name: &str, driver: &str) -> MachineTemplate {
    MachineTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: MachineTemplateSpec {
            display_name: "Small".to_string(),
            description: "2 vCPU, 4Gi".to_string(),
            driver: driver.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Non-builtin driver with a valid download url
pub fn test_driver(name: &str, active: bool) -> MachineDriver {
    MachineDriver::new(
        name,
        MachineDriverSpec {
            url: format!("https://releases.example.com/docker-machine-driver-{name}"),
            active,
            ..Default::default()
        },
    )
}

/// Builtin driver (no url needed)
pub fn test_builtin_driver(name: &str) -> MachineDriver {
    MachineDriver::new(
        name,
        MachineDriverSpec {
            builtin: true,
            active: true,
            ..Default::default()
        },
    )
}

/// Change made to the stored machine while a provision call is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightChange {
    /// Another writer bumps the machine's resourceVersion
    Touch,
    /// The machine is deleted
    Remove,
}

/// Provisioner returning scripted results
///
/// Provision calls succeed with a node named after the machine unless a
/// failure is queued. Observations default to a ready node.
#[derive(Debug, Default)]
pub struct MockProvisioner {
    provision_results: Mutex<VecDeque<Result<ProvisionedNode, ProvisionError>>>,
    observe_results: Mutex<VecDeque<Result<Option<NodeObservation>, ProvisionError>>>,
    requests: Mutex<Vec<ProvisionRequest>>,
    in_flight: Mutex<Option<(MockResourceStore<Machine>, InFlightChange)>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_provision(&self, result: Result<ProvisionedNode, ProvisionError>) {
        self.provision_results.lock().unwrap().push_back(result);
    }

    pub fn queue_observe(&self, result: Result<Option<NodeObservation>, ProvisionError>) {
        self.observe_results.lock().unwrap().push_back(result);
    }

    /// Apply `change` to the machine in `store` during the next provision call
    pub fn change_during_provision(&self, store: &MockResourceStore<Machine>, change: InFlightChange) {
        *self.in_flight.lock().unwrap() = Some((store.clone(), change));
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provisioner for MockProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedNode, ProvisionError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((store, change)) = self.in_flight.lock().unwrap().take() {
            let namespace = request.namespace.as_deref();
            match change {
                InFlightChange::Touch => store.touch(namespace, &request.machine_name),
                InFlightChange::Remove => {
                    store.remove(namespace, &request.machine_name);
                }
            }
        }
        self.provision_results.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ProvisionedNode {
                node_name: format!("node-{}", request.machine_name),
                node_config: RkeConfigNode {
                    address: "10.0.0.10".to_string(),
                    role: request.roles.clone(),
                    hostname_override: request.hostname.clone(),
                    user: "ubuntu".to_string(),
                    ..Default::default()
                },
                ssh_user: "ubuntu".to_string(),
                driver_config: format!("{{\"driver\":\"{}\"}}", request.driver),
            })
        })
    }

    async fn observe(&self, _node_name: &str) -> Result<Option<NodeObservation>, ProvisionError> {
        self.observe_results.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(Some(NodeObservation {
                ready: true,
                ..Default::default()
            }))
        })
    }
}

/// Reconciler over mock stores, with handles to the stores
pub struct TestEnv {
    pub machines: MockResourceStore<Machine>,
    pub templates: MockResourceStore<MachineTemplate>,
    pub drivers: MockResourceStore<MachineDriver>,
    pub clusters: MockClusterLookup,
    pub reconciler: Reconciler,
}

impl TestEnv {
    /// Environment without a provisioner
    pub fn new() -> Self {
        let machines = MockResourceStore::new();
        let templates = MockResourceStore::new();
        let drivers = MockResourceStore::new();
        let clusters = MockClusterLookup::new();
        let reconciler = Reconciler::new(
            Arc::new(machines.clone()),
            Arc::new(templates.clone()),
            Arc::new(drivers.clone()),
            Arc::new(clusters.clone()),
        );
        Self {
            machines,
            templates,
            drivers,
            clusters,
            reconciler,
        }
    }

    /// Environment whose reconciler drives `provisioner`
    pub fn with_provisioner(provisioner: Arc<MockProvisioner>) -> Self {
        let env = Self::new();
        Self {
            reconciler: env.reconciler.with_provisioner(provisioner),
            ..env
        }
    }

    /// Stored copy of a machine in [`TEST_NAMESPACE`]
    pub fn machine(&self, name: &str) -> Machine {
        self.machines.object(Some(TEST_NAMESPACE), name).unwrap()
    }

    /// Stored copy of a template in [`TEST_NAMESPACE`]
    pub fn template(&self, name: &str) -> MachineTemplate {
        self.templates.object(Some(TEST_NAMESPACE), name).unwrap()
    }

    /// Stored copy of a driver
    pub fn driver(&self, name: &str) -> MachineDriver {
        self.drivers.object(None, name).unwrap()
    }
}
