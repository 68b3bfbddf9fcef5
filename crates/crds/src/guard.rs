//! Write-time validation
//!
//! Checks run at the API-write boundary before an object is persisted:
//! reference syntax, `noupdate` fields on initialized machines, driver
//! selection for templates and builtin-driver protection.
//!
//! All functions are pure. They never look objects up; callers pass whatever
//! related objects are needed (e.g. the driver a template selects).

use crate::error::ValidationError;
use crate::machine::{Machine, MachineSpec};
use crate::machine_driver::MachineDriver;
use crate::machine_template::{MachineTemplate, MachineTemplateSpec};
use crate::references::{validate_reference_name, FieldAnnotations};
use serde::Serialize;
use serde_json::Value;

/// Trust level of the client performing a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientClass {
    /// Any authenticated client
    #[default]
    Normal,
    /// Exempt from builtin-driver protection
    Privileged,
}

impl ClientClass {
    /// Classify a client by its group memberships
    pub fn from_groups<S: AsRef<str>>(groups: &[S], privileged_group: &str) -> Self {
        if groups.iter().any(|group| group.as_ref() == privileged_group) {
            Self::Privileged
        } else {
            Self::Normal
        }
    }
}

/// Names of `noupdate` fields whose serialized value differs
pub fn changed_immutable_fields<T>(old: &T, new: &T) -> Result<Vec<&'static str>, ValidationError>
where
    T: FieldAnnotations + Serialize,
{
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;
    Ok(T::immutable_fields()
        .filter(|field| old.get(field.name) != new.get(field.name))
        .map(|field| field.name)
        .collect())
}

/// Check every non-empty reference field holds a valid object name
fn validate_references<T>(spec: &T) -> Result<(), ValidationError>
where
    T: FieldAnnotations + Serialize,
{
    let value = serde_json::to_value(spec)?;
    for field in T::reference_fields() {
        let Some(kind) = field.tag.reference else {
            continue;
        };
        match value.get(field.name) {
            Some(Value::String(name)) if !name.is_empty() => {
                validate_reference_name(field.name, kind, name)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate a Machine being created
pub fn validate_machine(new: &Machine) -> Result<(), ValidationError> {
    validate_references::<MachineSpec>(&new.spec)
}

/// Validate a Machine update
///
/// `noupdate` fields may change freely until the stored object reports
/// `Initialized=True`.
pub fn validate_machine_update(old: &Machine, new: &Machine) -> Result<(), ValidationError> {
    validate_machine(new)?;
    if !old.is_initialized() {
        return Ok(());
    }
    match changed_immutable_fields(&old.spec, &new.spec)?.first() {
        Some(&field) => Err(ValidationError::ImmutableField {
            kind: "Machine",
            field,
        }),
        None => Ok(()),
    }
}

/// Validate a MachineTemplate create (`old = None`) or update
///
/// `driver` is the MachineDriver named by `new.spec.driver`, if it exists.
/// A missing driver is allowed here and surfaces later as a condition. An
/// inactive driver is rejected only when the template newly selects it, so
/// existing templates keep working after a driver is deactivated.
pub fn validate_template(
    new: &MachineTemplate,
    driver: Option<&MachineDriver>,
    old: Option<&MachineTemplate>,
) -> Result<(), ValidationError> {
    validate_references::<MachineTemplateSpec>(&new.spec)?;

    let newly_selected = old.is_none_or(|old| old.spec.driver != new.spec.driver);
    match driver {
        Some(driver) if newly_selected && !driver.is_selectable() => {
            Err(ValidationError::InactiveDriver(new.spec.driver.clone()))
        }
        _ => Ok(()),
    }
}

/// Drivers offered for new template creation
pub fn selectable_drivers(drivers: &[MachineDriver]) -> Vec<&MachineDriver> {
    drivers.iter().filter(|driver| driver.is_selectable()).collect()
}

/// Validate a MachineDriver update
pub fn validate_driver_update(
    old: &MachineDriver,
    new: &MachineDriver,
    client: ClientClass,
) -> Result<(), ValidationError> {
    if client == ClientClass::Privileged || !old.is_builtin() {
        return Ok(());
    }

    let protected = [
        ("url", old.spec.url != new.spec.url),
        ("checksum", old.spec.checksum != new.spec.checksum),
        ("builtin", old.spec.builtin != new.spec.builtin),
    ];
    match protected.iter().find(|(_, changed)| *changed) {
        Some((field, _)) => Err(ValidationError::BuiltinDriver {
            name: driver_name(old),
            action: format!("modified ({field})"),
        }),
        None => Ok(()),
    }
}

/// Validate a MachineDriver deletion
pub fn validate_driver_delete(driver: &MachineDriver, client: ClientClass) -> Result<(), ValidationError> {
    if client == ClientClass::Normal && driver.is_builtin() {
        return Err(ValidationError::BuiltinDriver {
            name: driver_name(driver),
            action: "deleted".to_string(),
        });
    }
    Ok(())
}

fn driver_name(driver: &MachineDriver) -> String {
    driver.metadata.name.clone().unwrap_or_default()
}
