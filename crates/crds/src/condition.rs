//! Condition ledger
//!
//! Shared condition shape for Machine, MachineTemplate and MachineDriver, and
//! the upsert/read operations reconcilers use to record progress.
//!
//! Timestamp rules:
//! - `lastUpdateTime` moves on every write to a condition.
//! - `lastTransitionTime` moves only when `status` changes value.
//!
//! Reads tolerate several entries with the same type (the last one wins).
//! Writes collapse them, so after any `set_condition` there is at most one
//! entry per type.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a closed set of condition types that serialize as plain text.
///
/// Unrecognised strings written by other clients are kept in an `Other`
/// variant instead of failing deserialization. Extra wire spellings can be
/// listed after the canonical one (`Ready => "Ready" | "Configured"`).
macro_rules! condition_types {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $wire:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
            /// Condition type written by another client, kept verbatim
            Other(String),
        }

        impl $name {
            /// Wire representation of this condition type
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Other(other) => other.as_str(),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value {
                    $($wire $(| $alias)* => Self::$variant,)+
                    other => Self::Other(other.to_string()),
                }
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                Ok(Self::from(value.as_str()))
            }
        }

        impl ::schemars::JsonSchema for $name {
            fn inline_schema() -> bool {
                true
            }

            fn schema_name() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed(stringify!($name))
            }

            fn json_schema(generator: &mut ::schemars::SchemaGenerator) -> ::schemars::Schema {
                <String as ::schemars::JsonSchema>::json_schema(generator)
            }
        }
    };
}

/// Condition status following Kubernetes conventions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition was evaluated but the outcome is indeterminate
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A named, timestamped ternary fact about a resource's progress
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition<T> {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: T,

    /// Status of the condition, one of True, False, Unknown
    pub status: ConditionStatus,

    /// The last time this condition was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// The last time the status changed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason for the condition's last write
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message indicating details about the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Condition<T> {
    /// Whether the condition currently holds
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// What a `set_condition` call did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionChange {
    /// No condition of this type existed; one was appended
    Added,
    /// Same status; reason, message and update time were rewritten
    Refreshed,
    /// Status changed; both timestamps moved
    Transitioned,
}

impl ConditionChange {
    /// Whether the status value changed (or appeared for the first time)
    pub fn is_transition(self) -> bool {
        matches!(self, Self::Added | Self::Transitioned)
    }
}

/// Resources that carry a condition list in their status
///
/// Implementors create their status on first mutable access so that a fresh
/// object can be written to without special-casing `status: None`.
pub trait HasConditions {
    /// Closed set of condition types for this kind
    type ConditionType: Clone + PartialEq;

    /// Current conditions, in stored order
    fn conditions(&self) -> &[Condition<Self::ConditionType>];

    /// Mutable conditions, creating the status if needed
    fn conditions_mut(&mut self) -> &mut Vec<Condition<Self::ConditionType>>;
}

/// Look up the effective condition of `type_`
///
/// Returns `None` when the condition was never evaluated, which is distinct
/// from a condition whose status is `Unknown`. With duplicate entries, the
/// later one supersedes the earlier ones.
pub fn get_condition<'a, R>(
    resource: &'a R,
    type_: &R::ConditionType,
) -> Option<&'a Condition<R::ConditionType>>
where
    R: HasConditions + ?Sized,
{
    resource.conditions().iter().rev().find(|c| &c.type_ == type_)
}

/// Status of the effective condition of `type_`, if it was ever evaluated
pub fn condition_status<R>(resource: &R, type_: &R::ConditionType) -> Option<ConditionStatus>
where
    R: HasConditions + ?Sized,
{
    get_condition(resource, type_).map(|c| c.status)
}

/// Whether the effective condition of `type_` is `True`
pub fn is_condition_true<R>(resource: &R, type_: &R::ConditionType) -> bool
where
    R: HasConditions + ?Sized,
{
    get_condition(resource, type_).is_some_and(Condition::is_true)
}

/// Upsert a condition using the current time
pub fn set_condition<R>(
    resource: &mut R,
    type_: R::ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: Option<String>,
) -> ConditionChange
where
    R: HasConditions + ?Sized,
{
    set_condition_at(resource, type_, status, reason, message, Utc::now())
}

/// Upsert a condition with an explicit timestamp
pub fn set_condition_at<R>(
    resource: &mut R,
    type_: R::ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: Option<String>,
    now: DateTime<Utc>,
) -> ConditionChange
where
    R: HasConditions + ?Sized,
{
    upsert_condition(
        resource.conditions_mut(),
        type_,
        status,
        reason.into(),
        message,
        now,
    )
}

/// Upsert only when status, reason or message differ from the stored entry
///
/// Returns `None` when the ledger already records exactly this fact, leaving
/// `lastUpdateTime` untouched. Reconcilers use this to avoid rewriting status
/// on every pass.
pub fn ensure_condition<R>(
    resource: &mut R,
    type_: R::ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: Option<String>,
) -> Option<ConditionChange>
where
    R: HasConditions + ?Sized,
{
    let reason = reason.into();
    let unchanged = get_condition(resource, &type_).is_some_and(|c| {
        c.status == status && c.reason == reason && c.message == message
    }) && resource.conditions().iter().filter(|c| c.type_ == type_).count() == 1;
    if unchanged {
        return None;
    }
    Some(set_condition(resource, type_, status, reason, message))
}

/// Core upsert over a raw condition list
pub fn upsert_condition<T: PartialEq + Clone>(
    conditions: &mut Vec<Condition<T>>,
    type_: T,
    status: ConditionStatus,
    reason: String,
    message: Option<String>,
    now: DateTime<Utc>,
) -> ConditionChange {
    let (Some(first), Some(last)) = (
        conditions.iter().position(|c| c.type_ == type_),
        conditions.iter().rposition(|c| c.type_ == type_),
    ) else {
        conditions.push(Condition {
            type_,
            status,
            last_update_time: Some(now),
            last_transition_time: Some(now),
            reason,
            message,
        });
        return ConditionChange::Added;
    };

    let mut current = conditions[last].clone();
    let change = if current.status == status {
        ConditionChange::Refreshed
    } else {
        current.status = status;
        current.last_transition_time = Some(now);
        ConditionChange::Transitioned
    };
    current.reason = reason;
    current.message = message;
    current.last_update_time = Some(now);

    // The superseding entry takes the slot of the first duplicate.
    conditions[first] = current;
    let mut index = 0;
    conditions.retain(|c| {
        let keep = index == first || c.type_ != type_;
        index += 1;
        keep
    });
    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Default)]
    struct Subject {
        conditions: Vec<Condition<String>>,
    }

    impl HasConditions for Subject {
        type ConditionType = String;

        fn conditions(&self) -> &[Condition<String>] {
            &self.conditions
        }

        fn conditions_mut(&mut self) -> &mut Vec<Condition<String>> {
            &mut self.conditions
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn entry(type_: &str, status: ConditionStatus, reason: &str) -> Condition<String> {
        Condition {
            type_: type_.to_string(),
            status,
            last_update_time: Some(at(0)),
            last_transition_time: Some(at(0)),
            reason: reason.to_string(),
            message: None,
        }
    }

    #[test]
    fn test_absent_condition_appends_with_both_timestamps() {
        let mut subject = Subject::default();
        let change = set_condition_at(
            &mut subject,
            "Ready".to_string(),
            ConditionStatus::Unknown,
            "Waiting",
            None,
            at(1),
        );

        assert_eq!(change, ConditionChange::Added);
        let condition = get_condition(&subject, &"Ready".to_string()).unwrap();
        assert_eq!(condition.status, ConditionStatus::Unknown);
        assert_eq!(condition.last_update_time, Some(at(1)));
        assert_eq!(condition.last_transition_time, Some(at(1)));
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut subject = Subject::default();
        let ready = "Ready".to_string();
        set_condition_at(&mut subject, ready.clone(), ConditionStatus::True, "Up", None, at(1));
        let change = set_condition_at(
            &mut subject,
            ready.clone(),
            ConditionStatus::True,
            "StillUp",
            Some("node heartbeat".to_string()),
            at(5),
        );

        assert_eq!(change, ConditionChange::Refreshed);
        let condition = get_condition(&subject, &ready).unwrap();
        assert_eq!(condition.last_transition_time, Some(at(1)));
        assert_eq!(condition.last_update_time, Some(at(5)));
        assert_eq!(condition.reason, "StillUp");
        assert_eq!(condition.message.as_deref(), Some("node heartbeat"));
    }

    #[test]
    fn test_status_change_moves_both_timestamps() {
        let mut subject = Subject::default();
        let ready = "Ready".to_string();
        set_condition_at(&mut subject, ready.clone(), ConditionStatus::Unknown, "Pending", None, at(1));
        let change = set_condition_at(&mut subject, ready.clone(), ConditionStatus::True, "", None, at(7));

        assert_eq!(change, ConditionChange::Transitioned);
        let condition = get_condition(&subject, &ready).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.last_transition_time, Some(at(7)));
        assert_eq!(condition.last_update_time, Some(at(7)));
        assert_eq!(condition.reason, "");
    }

    #[test]
    fn test_repeated_identical_write_is_idempotent_apart_from_update_time() {
        let ready = "Ready".to_string();
        let mut once = Subject::default();
        set_condition_at(&mut once, ready.clone(), ConditionStatus::False, "Down", None, at(1));

        let mut twice = Subject::default();
        set_condition_at(&mut twice, ready.clone(), ConditionStatus::False, "Down", None, at(1));
        set_condition_at(&mut twice, ready.clone(), ConditionStatus::False, "Down", None, at(2));

        assert_eq!(once.conditions.len(), twice.conditions.len());
        let mut normalized = twice.conditions[0].clone();
        normalized.last_update_time = once.conditions[0].last_update_time;
        assert_eq!(normalized, once.conditions[0]);
    }

    #[test]
    fn test_absent_is_distinct_from_unknown() {
        let mut subject = Subject::default();
        let saved = "Saved".to_string();
        assert_eq!(condition_status(&subject, &saved), None);

        set_condition_at(&mut subject, saved.clone(), ConditionStatus::Unknown, "DriverTimeout", None, at(1));
        assert_eq!(condition_status(&subject, &saved), Some(ConditionStatus::Unknown));
        assert!(!is_condition_true(&subject, &saved));
    }

    #[test]
    fn test_later_duplicate_supersedes_on_read() {
        let subject = Subject {
            conditions: vec![
                entry("Ready", ConditionStatus::False, "Old"),
                entry("Saved", ConditionStatus::True, ""),
                entry("Ready", ConditionStatus::True, "New"),
            ],
        };

        let condition = get_condition(&subject, &"Ready".to_string()).unwrap();
        assert_eq!(condition.reason, "New");
        assert!(is_condition_true(&subject, &"Ready".to_string()));
    }

    #[test]
    fn test_write_collapses_duplicates_in_place() {
        let mut subject = Subject {
            conditions: vec![
                entry("Ready", ConditionStatus::False, "Old"),
                entry("Saved", ConditionStatus::True, ""),
                entry("Ready", ConditionStatus::True, "New"),
                entry("Provisioned", ConditionStatus::True, ""),
            ],
        };

        // Superseding entry is True, so this is a refresh of it
        let change = set_condition_at(
            &mut subject,
            "Ready".to_string(),
            ConditionStatus::True,
            "Confirmed",
            None,
            at(9),
        );

        assert_eq!(change, ConditionChange::Refreshed);
        let types: Vec<&str> = subject.conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["Ready", "Saved", "Provisioned"]);
        assert_eq!(subject.conditions[0].reason, "Confirmed");
        assert_eq!(subject.conditions[0].last_transition_time, Some(at(0)));
    }

    #[test]
    fn test_ensure_condition_skips_identical_fact() {
        let mut subject = Subject::default();
        let ready = "Ready".to_string();
        assert_eq!(
            ensure_condition(&mut subject, ready.clone(), ConditionStatus::True, "", None),
            Some(ConditionChange::Added)
        );
        let written = subject.conditions[0].clone();

        assert_eq!(
            ensure_condition(&mut subject, ready.clone(), ConditionStatus::True, "", None),
            None
        );
        assert_eq!(subject.conditions[0], written);

        assert_eq!(
            ensure_condition(&mut subject, ready, ConditionStatus::False, "NodeNotReady", None),
            Some(ConditionChange::Transitioned)
        );
    }

    #[test]
    fn test_condition_wire_format() {
        let condition = Condition {
            type_: "Ready".to_string(),
            status: ConditionStatus::True,
            last_update_time: Some(at(3)),
            last_transition_time: None,
            reason: String::new(),
            message: None,
        };

        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "Ready",
                "status": "True",
                "lastUpdateTime": "2024-01-01T00:03:00Z",
            })
        );
    }
}
