//! Object model and schema (C4).
//!
//! All four object kinds share one header shape; unlike the teacher's
//! `Task`/`Plan`/`Intent` (each a distinct struct), Trellis doesn't need
//! per-kind fields, so a single [`ObjectHeader`] carries them all and the
//! per-kind rules live in small lookup tables dispatched on [`Kind`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, TrellisError, ValidationErrors};

pub const CURRENT_SCHEMA_VERSION: &str = "1.1";

/// Which of the four object kinds a header describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Project,
    Epic,
    Feature,
    #[default]
    Task,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Project => "project",
            Kind::Epic => "epic",
            Kind::Feature => "feature",
            Kind::Task => "task",
        }
    }

    pub fn all() -> [Kind; 4] {
        [Kind::Project, Kind::Epic, Kind::Feature, Kind::Task]
    }

    /// The required parent kind, or `None` when the kind has no parent
    /// (project, and standalone task).
    pub fn required_parent_kind(&self) -> Option<Kind> {
        match self {
            Kind::Project => None,
            Kind::Epic => Some(Kind::Project),
            Kind::Feature => Some(Kind::Epic),
            Kind::Task => None,
        }
    }

    /// Statuses legal for this kind (spec §3.2).
    pub fn allowed_statuses(&self) -> &'static [Status] {
        match self {
            Kind::Project | Kind::Epic | Kind::Feature => {
                &[Status::Draft, Status::InProgress, Status::Done]
            }
            Kind::Task => &[Status::Open, Status::InProgress, Status::Review, Status::Done],
        }
    }

    /// The status a newly created object of this kind defaults to
    /// (spec §3.4).
    pub fn default_status(&self) -> Status {
        match self {
            Kind::Project | Kind::Epic | Kind::Feature => Status::Draft,
            Kind::Task => Status::Open,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "project" => Ok(Kind::Project),
            "epic" => Ok(Kind::Epic),
            "feature" => Ok(Kind::Feature),
            "task" => Ok(Kind::Task),
            _ => Err(()),
        }
    }
}

/// Lifecycle status. The union of all per-kind status sets; legality of
/// a given value for a given kind is checked separately
/// (`Kind::allowed_statuses`), and legal transitions by [`crate::lifecycle`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Draft,
    InProgress,
    Done,
    Open,
    Review,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::InProgress => "in-progress",
            Status::Done => "done",
            Status::Open => "open",
            Status::Review => "review",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Status::Draft),
            "in-progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "open" => Ok(Status::Open),
            "review" => Ok(Status::Review),
            _ => Err(()),
        }
    }
}

/// Scheduling priority. `"medium"` is accepted on input and
/// canonicalized to `Normal` (spec §3.1) before any enum check runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Sort rank used by the claim scheduler: `high=1, normal=2, low=3`.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "medium" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(()),
        }
    }
}

/// The common header every stored object carries (spec §3.1). Serialized
/// in field-declaration order so the on-disk key order matches §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub kind: Kind,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub status: Status,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    pub created: DateTime<Local>,
    pub updated: DateTime<Local>,
    pub schema_version: String,
}

impl ObjectHeader {
    /// Clean (unprefixed) id, regardless of whether `id` is stored with
    /// its kind prefix.
    pub fn clean_id(&self) -> String {
        crate::id::clean_prereq_fully(&self.id)
    }
}

/// Everything needed to validate a candidate header before it is
/// written: required fields, enum membership, parent rule, and status
/// set, all accumulated rather than short-circuited (spec §4.4).
pub fn validate_header(header: &ObjectHeader, parent_exists: bool) -> Result<(), TrellisError> {
    let mut errors = ValidationErrors::new();

    if header.title.trim().is_empty() {
        errors.push(
            TrellisError::new(ErrorCode::MissingRequiredField, "title")
                .with_kind(header.kind.as_str()),
        );
    }
    if header.id.trim().is_empty() {
        errors.push(
            TrellisError::new(ErrorCode::MissingRequiredField, "id").with_kind(header.kind.as_str()),
        );
    }

    match header.kind.required_parent_kind() {
        Some(_) if header.parent.is_none() => {
            errors.push(
                TrellisError::new(ErrorCode::ParentInvalid, format!("{} requires a parent", header.kind))
                    .with_kind(header.kind.as_str()),
            );
        }
        None if header.kind == Kind::Project && header.parent.is_some() => {
            errors.push(
                TrellisError::new(ErrorCode::ParentInvalid, "project may not have a parent")
                    .with_kind(header.kind.as_str()),
            );
        }
        _ => {}
    }

    if header.parent.is_some() && !parent_exists {
        errors.push(
            TrellisError::new(ErrorCode::ParentNotExist, format!("parent '{}' does not exist", header.parent.clone().unwrap_or_default()))
                .with_kind(header.kind.as_str()),
        );
    }

    if !header.kind.allowed_statuses().contains(&header.status) {
        let allowed: Vec<&str> = header.kind.allowed_statuses().iter().map(Status::as_str).collect();
        errors.push(TrellisError::new(
            ErrorCode::InvalidField,
            format!(
                "Invalid status '{}' for {}. Must be one of: {}",
                header.status, header.kind, allowed.join(", ")
            ),
        ));
    }

    errors.into_result_or_first(ErrorCode::MissingRequiredField)
}

pub fn validate_kind_str(raw: &str) -> Result<Kind, TrellisError> {
    Kind::from_str(raw).map_err(|_| {
        TrellisError::new(
            ErrorCode::InvalidField,
            format!(
                "Invalid kind '{raw}'. Must be one of: [project, epic, feature, task]"
            ),
        )
    })
}

/// A small sum type used for deep-merge yaml patches (spec §9: "typed
/// patches as typed maps"). Mirrors a JSON/YAML value restricted to the
/// shapes a header patch can take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatchValue {
    Null,
    Bool(bool),
    Number(serde_yaml_ng::Number),
    String(String),
    List(Vec<PatchValue>),
    Map(BTreeMap<String, PatchValue>),
}

/// Recursively merges `patch` into `base`: nested maps merge key by key,
/// scalars and lists replace wholesale (spec §4.12).
pub fn deep_merge(base: &mut BTreeMap<String, PatchValue>, patch: BTreeMap<String, PatchValue>) {
    for (key, value) in patch {
        match (base.get_mut(&key), value) {
            (Some(PatchValue::Map(existing)), PatchValue::Map(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
}

impl From<serde_yaml_ng::Value> for PatchValue {
    fn from(value: serde_yaml_ng::Value) -> Self {
        use serde_yaml_ng::Value;
        match value {
            Value::Null => PatchValue::Null,
            Value::Bool(b) => PatchValue::Bool(b),
            Value::Number(n) => PatchValue::Number(n),
            Value::String(s) => PatchValue::String(s),
            Value::Sequence(items) => PatchValue::List(items.into_iter().map(PatchValue::from).collect()),
            Value::Mapping(map) => PatchValue::Map(
                map.into_iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), PatchValue::from(v))))
                    .collect(),
            ),
            Value::Tagged(tagged) => PatchValue::from(tagged.value),
        }
    }
}

impl From<PatchValue> for serde_yaml_ng::Value {
    fn from(value: PatchValue) -> Self {
        use serde_yaml_ng::Value;
        match value {
            PatchValue::Null => Value::Null,
            PatchValue::Bool(b) => Value::Bool(b),
            PatchValue::Number(n) => Value::Number(n),
            PatchValue::String(s) => Value::String(s),
            PatchValue::List(items) => Value::Sequence(items.into_iter().map(Value::from).collect()),
            PatchValue::Map(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (Value::String(k), Value::from(v))).collect())
            }
        }
    }
}

/// Converts a header into a patch-shaped map, for deep-merging an
/// incoming `yamlPatch` into it (spec §4.12, §9).
pub fn header_to_patch_map(header: &ObjectHeader) -> Result<BTreeMap<String, PatchValue>, TrellisError> {
    let value = serde_yaml_ng::to_value(header)
        .map_err(|e| TrellisError::new(ErrorCode::InvalidField, format!("failed to serialize header: {e}")))?;
    match PatchValue::from(value) {
        PatchValue::Map(map) => Ok(map),
        _ => Err(TrellisError::new(ErrorCode::InvalidField, "header did not serialize to a map")),
    }
}

/// Converts a merged patch map back into a header.
pub fn patch_map_to_header(map: BTreeMap<String, PatchValue>) -> Result<ObjectHeader, TrellisError> {
    let value: serde_yaml_ng::Value = PatchValue::Map(map).into();
    serde_yaml_ng::from_value(value)
        .map_err(|e| TrellisError::new(ErrorCode::InvalidField, format!("invalid header after patch: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medium_priority_canonicalizes_to_normal() {
        assert_eq!(Priority::from_str("medium"), Ok(Priority::Normal));
    }

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
    }

    #[test]
    fn feature_status_set_excludes_task_statuses() {
        assert!(!Kind::Feature.allowed_statuses().contains(&Status::Open));
        assert!(Kind::Task.allowed_statuses().contains(&Status::Open));
    }

    #[test]
    fn deep_merge_replaces_scalars_and_merges_nested_maps() {
        let mut base = BTreeMap::new();
        base.insert("title".to_string(), PatchValue::String("old".to_string()));
        let mut nested_base = BTreeMap::new();
        nested_base.insert("a".to_string(), PatchValue::Number(1.into()));
        base.insert("meta".to_string(), PatchValue::Map(nested_base));

        let mut patch = BTreeMap::new();
        patch.insert("title".to_string(), PatchValue::String("new".to_string()));
        let mut nested_patch = BTreeMap::new();
        nested_patch.insert("b".to_string(), PatchValue::Number(2.into()));
        patch.insert("meta".to_string(), PatchValue::Map(nested_patch));

        deep_merge(&mut base, patch);

        assert_eq!(base.get("title"), Some(&PatchValue::String("new".to_string())));
        match base.get("meta") {
            Some(PatchValue::Map(m)) => {
                assert!(m.contains_key("a"));
                assert!(m.contains_key("b"));
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn header_round_trips_through_patch_map() {
        let header = ObjectHeader {
            kind: Kind::Task,
            id: "T-x".to_string(),
            parent: Some("F-login".to_string()),
            status: Status::Open,
            title: "X".to_string(),
            priority: Priority::High,
            prerequisites: vec!["a".to_string()],
            worktree: None,
            created: Local::now(),
            updated: Local::now(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        };
        let map = header_to_patch_map(&header).unwrap();
        let back = patch_map_to_header(map).unwrap();
        assert_eq!(back.id, header.id);
        assert_eq!(back.title, header.title);
        assert_eq!(back.prerequisites, header.prerequisites);
    }

    #[test]
    fn validate_header_accumulates_multiple_errors() {
        let header = ObjectHeader {
            kind: Kind::Epic,
            id: String::new(),
            parent: None,
            status: Status::Open,
            title: String::new(),
            priority: Priority::Normal,
            prerequisites: vec![],
            worktree: None,
            created: Local::now(),
            updated: Local::now(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        };
        assert!(validate_header(&header, false).is_err());
    }
}
