//! MachineTemplate CRD
//!
//! Reusable provisioning parameters: which driver to use plus the engine
//! settings shared by every machine created from the template.

use crate::condition::{get_condition, Condition, ConditionStatus, HasConditions};
use crate::references::{FieldAnnotations, FieldSchema, ReferenceKind, TypedReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

condition_types! {
    /// MachineTemplate condition types
    MachineTemplateConditionType {
        /// The referenced MachineDriver exists
        DriverResolved => "DriverResolved",
    }
}

/// Condition entry on a MachineTemplate
pub type MachineTemplateCondition = Condition<MachineTemplateConditionType>;

/// Condition reasons written by the template reconciler
pub mod reason {
    /// `driver` does not name an existing driver
    pub const DRIVER_NOT_FOUND: &str = "DriverNotFound";
    /// Driver is being deleted
    pub const DRIVER_NOT_READY: &str = "DriverNotReady";
    /// Driver disappeared after it was resolved
    pub const DRIVER_REMOVED: &str = "DriverRemoved";
}

/// MachineTemplate specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    derive = "PartialEq",
    kind = "MachineTemplate",
    namespaced,
    status = "MachineTemplateStatus",
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Human-friendly name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Name of the MachineDriver used to provision machines
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub driver: String,

    /// Engine parameters shared by every machine from this template
    #[serde(flatten)]
    pub common: MachineCommonParams,
}

/// Container engine parameters, inlined into the template spec
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineCommonParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_certificate_authority: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_key: String,

    /// Script URL used to install the engine
    #[serde(rename = "engineInstallURL", default, skip_serializing_if = "String::is_empty")]
    pub engine_install_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_version: String,

    /// Extra engine flags (`name → value`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_opt: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engine_insecure_registry: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engine_registry_mirror: Vec<String>,

    /// Labels applied to the engine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_label: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub engine_storage_driver: String,

    /// Environment passed to the engine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_env: BTreeMap<String, String>,
}

/// MachineTemplate status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MachineTemplateCondition>,
}

impl HasConditions for MachineTemplate {
    type ConditionType = MachineTemplateConditionType;

    fn conditions(&self) -> &[MachineTemplateCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<MachineTemplateCondition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl MachineTemplate {
    /// Whether `DriverResolved` recorded the loss of a previously resolved driver
    pub fn driver_lost(&self) -> bool {
        get_condition(self, &MachineTemplateConditionType::DriverResolved)
            .is_some_and(|c| c.status == ConditionStatus::False && c.reason == reason::DRIVER_REMOVED)
    }
}

impl MachineTemplateSpec {
    /// Reference to the driver, if one is named
    pub fn driver_ref(&self) -> Option<TypedReference> {
        (!self.driver.is_empty()).then(|| TypedReference::new(ReferenceKind::MachineDriver, &self.driver))
    }
}

impl FieldAnnotations for MachineTemplateSpec {
    const FIELDS: &'static [FieldSchema] =
        &[FieldSchema::new("driver").reference(ReferenceKind::MachineDriver)];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_common_params_are_inlined() {
        let spec = MachineTemplateSpec {
            driver: "amazonec2".to_string(),
            common: MachineCommonParams {
                engine_install_url: "https://get.docker.com".to_string(),
                engine_label: BTreeMap::from([("tier".to_string(), "edge".to_string())]),
                engine_registry_mirror: vec!["https://mirror.local".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            json!({
                "driver": "amazonec2",
                "engineInstallURL": "https://get.docker.com",
                "engineLabel": {"tier": "edge"},
                "engineRegistryMirror": ["https://mirror.local"],
            })
        );

        let back: MachineTemplateSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_driver_lost_only_after_removal() {
        let mut template = MachineTemplate::new("tpl-a", MachineTemplateSpec::default());
        assert!(!template.driver_lost());

        crate::set_condition(
            &mut template,
            MachineTemplateConditionType::DriverResolved,
            ConditionStatus::Unknown,
            reason::DRIVER_NOT_FOUND,
            None,
        );
        assert!(!template.driver_lost());

        crate::set_condition(
            &mut template,
            MachineTemplateConditionType::DriverResolved,
            ConditionStatus::False,
            reason::DRIVER_REMOVED,
            None,
        );
        assert!(template.driver_lost());
    }

    #[test]
    fn test_driver_ref_is_cluster_scoped() {
        let spec = MachineTemplateSpec {
            driver: "vmwarevsphere".to_string(),
            ..Default::default()
        };
        let driver = spec.driver_ref().unwrap();
        assert_eq!(driver.kind, ReferenceKind::MachineDriver);
        assert_eq!(driver.namespace, None);
        assert!(MachineTemplateSpec::default().driver_ref().is_none());
    }
}
