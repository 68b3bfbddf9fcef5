//! Machine CRD
//!
//! A single provisioned node: requested placement in `spec`, observed node
//! runtime state and condition history in `status`.

use crate::condition::{get_condition, is_condition_true, Condition, ConditionStatus, HasConditions};
use crate::machine_template::MachineTemplateSpec;
use crate::references::{FieldAnnotations, FieldSchema, ReferenceKind, TypedReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource name → quantity string (e.g. `cpu: "4"`, `memory: "8Gi"`)
pub type ResourceList = BTreeMap<String, String>;

condition_types! {
    /// Machine condition types, in causal order
    MachineConditionType {
        /// Template and cluster references resolved
        Initialized => "Initialized",
        /// Driver resolved and template snapshot captured
        Provisioned => "Provisioned",
        /// Provisioned node configuration persisted
        Saved => "Saved",
        /// Node observed healthy
        Ready => "Ready" | "Configured",
    }
}

/// Condition entry on a Machine
pub type MachineCondition = Condition<MachineConditionType>;

/// Condition reasons written by the machine reconciler
pub mod reason {
    /// `machineTemplateName` does not name an existing template
    pub const TEMPLATE_NOT_FOUND: &str = "TemplateNotFound";
    /// Referenced template is being deleted
    pub const TEMPLATE_NOT_READY: &str = "TemplateNotReady";
    /// Template disappeared after the machine was initialized
    pub const TEMPLATE_REMOVED: &str = "MachineTemplateRemoved";
    /// `requestedClusterName` does not name an existing cluster
    pub const CLUSTER_NOT_FOUND: &str = "ClusterNotFound";
    /// Referenced cluster is being deleted
    pub const CLUSTER_NOT_READY: &str = "ClusterNotReady";
    /// Cluster disappeared after the machine was initialized
    pub const CLUSTER_REMOVED: &str = "ClusterRemoved";
    /// Template's driver does not exist
    pub const DRIVER_NOT_FOUND: &str = "DriverNotFound";
    /// Template's driver is being deleted
    pub const DRIVER_NOT_READY: &str = "DriverNotReady";
    /// Template lost its driver before the machine was provisioned
    pub const TEMPLATE_DRIVER_REMOVED: &str = "TemplateDriverRemoved";
    /// Driver disappeared after the machine was provisioned
    pub const DRIVER_REMOVED: &str = "MachineDriverRemoved";
    /// Provisioner did not answer in time
    pub const DRIVER_TIMEOUT: &str = "DriverTimeout";
    /// Provisioner reported a failure
    pub const PROVISION_FAILED: &str = "ProvisionFailed";
    /// Node reported itself not ready
    pub const NODE_NOT_READY: &str = "NodeNotReady";
    /// Node could not be observed
    pub const NODE_NOT_FOUND: &str = "NodeNotFound";

    /// Reasons that mark a machine as permanently failed
    pub const PERMANENT: &[&str] = &[TEMPLATE_REMOVED, CLUSTER_REMOVED, DRIVER_REMOVED];
}

/// Machine specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    derive = "PartialEq",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "mach",
    printcolumn = r#"{"name":"Template","type":"string","jsonPath":".spec.machineTemplateName"}"#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.requestedClusterName"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Scheduling spec applied to the node once it joins
    #[serde(default)]
    pub node_spec: NodeSpec,

    /// Human-friendly name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Hostname requested for the node
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requested_hostname: String,

    /// Name of the cluster the node should join
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requested_cluster_name: String,

    /// Roles requested for the node (etcd, controlplane, worker)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_roles: Vec<String>,

    /// Name of the MachineTemplate in the same namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_template_name: String,
}

/// Node scheduling spec
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Pod IP range assigned to the node
    #[serde(rename = "podCIDR", default, skip_serializing_if = "String::is_empty")]
    pub pod_cidr: String,

    /// Cloud provider ID of the node
    #[serde(rename = "providerID", default, skip_serializing_if = "String::is_empty")]
    pub provider_id: String,

    /// Whether new pods are kept off the node
    #[serde(default)]
    pub unschedulable: bool,

    /// Taints applied to the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

/// Node taint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key
    pub key: String,

    /// Optional value paired with the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// NoSchedule, PreferNoSchedule or NoExecute
    pub effect: String,
}

/// Machine status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Condition history (Initialized → Provisioned → Saved → Ready)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MachineCondition>,

    /// Observed node runtime state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_status: Option<NodeStatus>,

    /// Name of the node object backing this machine
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,

    /// Cluster the machine was admitted to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// Resources requested by workloads on the node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requested: ResourceList,

    /// Resource limits of workloads on the node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: ResourceList,

    /// Template spec captured when the machine was provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_template_spec: Option<MachineTemplateSpec>,

    /// Node configuration used for cluster provisioning
    #[serde(rename = "rkeNode", default, skip_serializing_if = "Option::is_none")]
    pub node_config: Option<RkeConfigNode>,

    /// SSH user for the provisioned host
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_user: String,

    /// Opaque driver configuration blob
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_driver_config: String,
}

/// Observed node state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Total resources of the node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: ResourceList,

    /// Resources available for scheduling
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable: ResourceList,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,

    /// Pending, Running or Terminated
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
}

/// Address reachable on the node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeAddress {
    /// Hostname, ExternalIP or InternalIP
    #[serde(rename = "type")]
    pub type_: String,

    pub address: String,
}

/// Node entry handed to the cluster provisioner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RkeConfigNode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_address: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname_override: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_socket: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_path: String,
}

impl HasConditions for Machine {
    type ConditionType = MachineConditionType;

    fn conditions(&self) -> &[MachineCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<MachineCondition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl Machine {
    /// Whether template and cluster references have been resolved once
    pub fn is_initialized(&self) -> bool {
        is_condition_true(self, &MachineConditionType::Initialized)
    }

    /// Whether the driver was resolved and the template snapshot captured
    pub fn is_provisioned(&self) -> bool {
        is_condition_true(self, &MachineConditionType::Provisioned)
    }

    /// Reference to the MachineTemplate, if one is named
    pub fn template_ref(&self) -> Option<TypedReference> {
        (!self.spec.machine_template_name.is_empty()).then(|| {
            TypedReference::in_namespace(
                ReferenceKind::MachineTemplate,
                &self.spec.machine_template_name,
                self.metadata.namespace.as_deref(),
            )
        })
    }

    /// Reference to the requested cluster, if one is named
    pub fn cluster_ref(&self) -> Option<TypedReference> {
        (!self.spec.requested_cluster_name.is_empty())
            .then(|| TypedReference::new(ReferenceKind::Cluster, &self.spec.requested_cluster_name))
    }

    /// Template spec captured at provisioning time
    pub fn template_snapshot(&self) -> Option<&MachineTemplateSpec> {
        self.status.as_ref()?.machine_template_spec.as_ref()
    }

    /// `Ready=False` condition carrying a permanent-loss reason, if any
    pub fn permanent_failure(&self) -> Option<&MachineCondition> {
        get_condition(self, &MachineConditionType::Ready).filter(|ready| {
            ready.status == ConditionStatus::False && reason::PERMANENT.contains(&ready.reason.as_str())
        })
    }
}

impl FieldAnnotations for MachineSpec {
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("requestedHostname").no_update(),
        FieldSchema::new("requestedClusterName")
            .reference(ReferenceKind::Cluster)
            .no_update(),
        FieldSchema::new("requestedRoles").no_update(),
        FieldSchema::new("machineTemplateName")
            .reference(ReferenceKind::MachineTemplate)
            .no_update(),
    ];
}

impl FieldAnnotations for MachineStatus {
    const FIELDS: &'static [FieldSchema] =
        &[FieldSchema::new("clusterName").reference(ReferenceKind::Cluster)];
}
