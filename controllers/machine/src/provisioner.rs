//! Machine provisioning interface.
//!
//! Running machine-driver plugins is outside this controller. A
//! `Provisioner` is the seam where such an executor plugs in; without one the
//! reconciler stops machines at `Provisioned` and leaves `Saved` and `Ready`
//! unevaluated.

use machine_crds::{MachineTemplateSpec, NodeStatus, ResourceList, RkeConfigNode};
use std::time::Duration;
use thiserror::Error;

/// Everything a driver needs to create one machine
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub namespace: Option<String>,
    pub machine_name: String,
    pub hostname: String,
    pub roles: Vec<String>,
    pub driver: String,
    /// Template snapshot the machine was provisioned from
    pub template: MachineTemplateSpec,
}

/// Result of a successful provisioning call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedNode {
    pub node_name: String,
    pub node_config: RkeConfigNode,
    pub ssh_user: String,
    /// Opaque driver state, persisted as `machineDriverConfig`
    pub driver_config: String,
}

/// Observed state of a provisioned node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeObservation {
    pub ready: bool,
    pub message: Option<String>,
    pub node_status: NodeStatus,
    pub requested: ResourceList,
    pub limits: ResourceList,
}

/// Provisioner outcomes that are recorded as conditions
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProvisionError {
    /// Driver did not answer in time; outcome unknown
    #[error("driver did not respond within {0:?}")]
    Timeout(Duration),

    /// Driver reported a failure
    #[error("{0}")]
    Failed(String),
}

/// Executor for machine-driver plugins
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the machine described by `request`
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedNode, ProvisionError>;

    /// Observe a provisioned node; `Ok(None)` when the node is not visible
    async fn observe(&self, node_name: &str) -> Result<Option<NodeObservation>, ProvisionError>;
}
