//! Machine provisioning CRD definitions
//!
//! Machine, MachineTemplate and MachineDriver resources (`management.cattle.io/v3`),
//! the condition ledger their status is built on, reference metadata, and the
//! pure validation and snapshot functions applied at write time.

#[macro_use]
pub mod condition;

pub mod error;
pub mod guard;
pub mod machine;
pub mod machine_driver;
pub mod machine_template;
pub mod references;
pub mod snapshot;


pub use condition::*;
pub use error::ValidationError;
pub use guard::*;
pub use machine::{
    Machine, MachineCondition, MachineConditionType, MachineSpec, MachineStatus, NodeAddress,
    NodeSpec, NodeStatus, ResourceList, RkeConfigNode, Taint,
};
pub use machine_driver::{
    MachineDriver, MachineDriverCondition, MachineDriverConditionType, MachineDriverSpec,
    MachineDriverStatus,
};
pub use machine_template::{
    MachineCommonParams, MachineTemplate, MachineTemplateCondition, MachineTemplateConditionType,
    MachineTemplateSpec, MachineTemplateStatus,
};
pub use references::*;
pub use snapshot::*;
