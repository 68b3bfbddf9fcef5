//! MachineDriver CRD
//!
//! Registry entry for a provisioning plugin. Cluster-scoped.

use crate::condition::{is_condition_true, Condition, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

condition_types! {
    /// MachineDriver condition types
    MachineDriverConditionType {
        /// Driver source (url, checksum) is well formed
        Validated => "Validated",
        /// Driver is offered for new templates
        Active => "Active",
    }
}

/// Condition entry on a MachineDriver
pub type MachineDriverCondition = Condition<MachineDriverConditionType>;

/// Condition reasons written by the driver reconciler
pub mod reason {
    /// Driver source failed validation
    pub const INVALID_SOURCE: &str = "InvalidSource";
    /// `spec.active` is false
    pub const DEACTIVATED: &str = "Deactivated";
}

/// MachineDriver specification
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    derive = "PartialEq",
    kind = "MachineDriver",
    status = "MachineDriverStatus",
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".spec.active"}"#,
    printcolumn = r#"{"name":"Builtin","type":"boolean","jsonPath":".spec.builtin"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDriverSpec {
    #[serde(default)]
    pub description: String,

    /// Location of the driver binary
    #[serde(default)]
    pub url: String,

    /// Identifier of the driver in an external catalog
    #[serde(default)]
    pub external_id: String,

    /// Shipped with the platform; protected from normal clients
    #[serde(default)]
    pub builtin: bool,

    /// Offered for new templates
    #[serde(default)]
    pub active: bool,

    /// Hex digest of the driver binary
    #[serde(default)]
    pub checksum: String,

    /// Location of the driver's UI component
    #[serde(default)]
    pub ui_url: String,
}

/// MachineDriver status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDriverStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MachineDriverCondition>,
}

impl HasConditions for MachineDriver {
    type ConditionType = MachineDriverConditionType;

    fn conditions(&self) -> &[MachineDriverCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<MachineDriverCondition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl MachineDriver {
    /// Shipped with the platform and protected from normal clients
    pub fn is_builtin(&self) -> bool {
        self.spec.builtin
    }

    /// Whether the driver is switched on
    pub fn is_active(&self) -> bool {
        self.spec.active
    }

    /// Whether new templates may select this driver
    pub fn is_selectable(&self) -> bool {
        self.spec.active && self.metadata.deletion_timestamp.is_none()
    }

    /// Whether the last validation pass accepted the source
    pub fn is_validated(&self) -> bool {
        is_condition_true(self, &MachineDriverConditionType::Validated)
    }
}

impl MachineDriverSpec {
    /// Describe what is wrong with the driver source, if anything
    ///
    /// Builtin drivers ship with the platform and need no url. Everything
    /// else must be downloadable over http(s). A checksum, when present, must
    /// be a hex digest.
    pub fn source_problem(&self) -> Option<String> {
        if !self.builtin {
            if self.url.is_empty() {
                return Some("url is required for non-builtin drivers".to_string());
            }
            if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
                return Some(format!("url {:?} must use http or https", self.url));
            }
        }
        if !self.checksum.is_empty() && !self.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(format!("checksum {:?} is not a hex digest", self.checksum));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str, checksum: &str, builtin: bool) -> MachineDriverSpec {
        MachineDriverSpec {
            url: url.to_string(),
            checksum: checksum.to_string(),
            builtin,
            ..Default::default()
        }
    }

    #[test]
    fn test_source_problem() {
        assert_eq!(spec("", "", true).source_problem(), None);
        assert_eq!(
            spec("https://releases.example.com/docker-machine-driver-x", "a1b2c3", false).source_problem(),
            None
        );
        assert!(spec("", "", false).source_problem().is_some());
        assert!(spec("ftp://example.com/driver", "", false).source_problem().is_some());
        assert!(spec("", "not-hex", true).source_problem().is_some());
    }

    #[test]
    fn test_driver_wire_keys() {
        let spec = MachineDriverSpec {
            external_id: "catalog://driver".to_string(),
            ui_url: "https://ui.example.com/component.js".to_string(),
            active: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["externalId"], "catalog://driver");
        assert_eq!(value["uiUrl"], "https://ui.example.com/component.js");
        assert_eq!(value["builtin"], false);
        assert_eq!(value["url"], "");
    }

    #[test]
    fn test_selectable_requires_active_and_not_deleting() {
        let mut driver = MachineDriver::new("amazonec2", MachineDriverSpec { active: true, ..Default::default() });
        assert!(driver.is_selectable());

        driver.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
        assert!(!driver.is_selectable());

        driver.metadata.deletion_timestamp = None;
        driver.spec.active = false;
        assert!(!driver.is_selectable());
    }
}
