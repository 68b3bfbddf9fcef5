//! Typed references and field annotations
//!
//! Reference fields (`requestedClusterName`, `machineTemplateName`, `driver`)
//! are stored as plain names and resolved by name on every reconciliation
//! pass. Which fields are references, and which are immutable after
//! initialization, is exposed as metadata through [`FieldAnnotations`] so that
//! validators and UIs read it instead of hardcoding field lists.
//!
//! Annotations use the norman tag syntax: `type=reference[cluster],noupdate`.

use crate::error::ValidationError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// API group shared by every kind in this crate
pub const API_GROUP: &str = "management.cattle.io";

/// Kinds that reference fields can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    /// Cluster (external to this crate, cluster-scoped)
    Cluster,
    /// MachineTemplate (namespaced)
    MachineTemplate,
    /// MachineDriver (cluster-scoped)
    MachineDriver,
}

impl ReferenceKind {
    /// Tag spelling used inside `reference[...]`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::MachineTemplate => "machineTemplate",
            Self::MachineDriver => "machineDriver",
        }
    }

    /// Kubernetes kind name
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::MachineTemplate => "MachineTemplate",
            Self::MachineDriver => "MachineDriver",
        }
    }

    /// Whether the target lives in the referencing object's namespace
    pub const fn is_namespaced(self) -> bool {
        matches!(self, Self::MachineTemplate)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Self::Cluster),
            "machineTemplate" => Ok(Self::MachineTemplate),
            "machineDriver" => Ok(Self::MachineDriver),
            other => Err(ValidationError::MalformedTag(format!("reference[{other}]"))),
        }
    }
}

/// Parsed field tag: optional reference target plus the `noupdate` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldTag {
    /// Kind the field references, if any
    pub reference: Option<ReferenceKind>,
    /// Field cannot change once the object is initialized
    pub no_update: bool,
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(kind) = self.reference {
            parts.push(format!("type=reference[{kind}]"));
        }
        if self.no_update {
            parts.push("noupdate".to_string());
        }
        f.write_str(&parts.join(","))
    }
}

impl FromStr for FieldTag {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tag = FieldTag::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part == "noupdate" {
                tag.no_update = true;
            } else if let Some(inner) = part
                .strip_prefix("type=reference[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                tag.reference = Some(inner.parse()?);
            } else {
                return Err(ValidationError::MalformedTag(s.to_string()));
            }
        }
        Ok(tag)
    }
}

/// Annotation metadata for a single serialized field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    /// Wire (JSON) name of the field
    pub name: &'static str,
    /// Reference/immutability tag
    pub tag: FieldTag,
}

impl FieldSchema {
    /// Untagged field
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            tag: FieldTag {
                reference: None,
                no_update: false,
            },
        }
    }

    /// Mark the field as a reference to `kind`
    pub const fn reference(mut self, kind: ReferenceKind) -> Self {
        self.tag.reference = Some(kind);
        self
    }

    /// Mark the field as immutable after initialization
    pub const fn no_update(mut self) -> Self {
        self.tag.no_update = true;
        self
    }
}

/// Types that publish field annotations
pub trait FieldAnnotations {
    /// Annotated fields, by wire name
    const FIELDS: &'static [FieldSchema];

    /// Wire name → rendered tag, for generic validators and UIs
    fn field_annotations() -> BTreeMap<&'static str, String> {
        Self::FIELDS
            .iter()
            .map(|field| (field.name, field.tag.to_string()))
            .collect()
    }

    /// Fields tagged `noupdate`
    fn immutable_fields() -> impl Iterator<Item = &'static FieldSchema> {
        Self::FIELDS.iter().filter(|field| field.tag.no_update)
    }

    /// Fields tagged `type=reference[...]`
    fn reference_fields() -> impl Iterator<Item = &'static FieldSchema> {
        Self::FIELDS.iter().filter(|field| field.tag.reference.is_some())
    }
}

/// Name-based link to another resource
///
/// Follows the Kubernetes `TypedLocalObjectReference` shape. It is a weak
/// link: holding one never implies the target exists.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    /// API group of the referenced resource
    pub api_group: String,

    /// Kind of the referenced resource
    pub kind: ReferenceKind,

    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (namespaced kinds only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TypedReference {
    /// Reference to a cluster-scoped target, or one in the same namespace
    pub fn new(kind: ReferenceKind, name: impl Into<String>) -> Self {
        Self {
            api_group: API_GROUP.to_string(),
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    /// Reference qualified with the referencing object's namespace
    ///
    /// The namespace is dropped for cluster-scoped kinds.
    pub fn in_namespace(kind: ReferenceKind, name: impl Into<String>, namespace: Option<&str>) -> Self {
        let mut reference = Self::new(kind, name);
        if kind.is_namespaced() {
            reference.namespace = namespace.map(str::to_string);
        }
        reference
    }

    /// Check the name is usable as an object name
    pub fn validate(&self, field: &'static str) -> Result<(), ValidationError> {
        validate_reference_name(field, self.kind, &self.name)
    }
}

impl fmt::Display for TypedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.kind(), ns, self.name),
            None => write!(f, "{}/{}", self.kind.kind(), self.name),
        }
    }
}

/// Validate a referenced object name (DNS-1123 subdomain)
pub fn validate_reference_name(
    field: &'static str,
    kind: ReferenceKind,
    name: &str,
) -> Result<(), ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedReference {
        field,
        kind: kind.kind(),
        value: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(malformed("name is empty"));
    }
    if name.len() > 253 {
        return Err(malformed("name is longer than 253 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(malformed(
            "name may only contain lowercase letters, digits, '-' and '.'",
        ));
    }
    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(alphanumeric) || !name.ends_with(alphanumeric) {
        return Err(malformed("name must start and end with a letter or digit"));
    }
    Ok(())
}
