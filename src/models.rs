//! # Models: Backend Data Types
//!
//! Serde mirrors of the records the analytics backend returns: tasks (one
//! logged input/output interaction), the events attached to them, the eval
//! that last labeled a task, project-level event definitions, topics, and
//! per-user aggregates.
//!
//! The backend owns all of these. The client holds copies per fetched page and
//! patches them locally during optimistic mutations (see [`crate::mutation`]).
//!
//! Decoding is tolerant: collections that are missing or `null` on the wire
//! decode as empty, since older records do not always carry every field, and
//! unrecognized flag values decode as no flag.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Source tag for labels and events created by a human project owner.
pub const OWNER_SOURCE: &str = "owner";

/// Prefix of ids given to events created locally before the backend confirms them.
pub const PROVISIONAL_ID_PREFIX: &str = "pending-";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Older records carry placeholder flags such as `"undefined"`; anything that
/// is not a known flag decodes as no flag.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<Flag>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(raw)) => raw.parse().ok(),
        _ => None,
    })
}

// ── Flag ────────────────────────────────────────────────────────

/// Human (or automatic) success/failure label on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Success,
    Failure,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Success => "success",
            Flag::Failure => "failure",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "up" | "thumbs-up" => Ok(Flag::Success),
            "failure" | "down" | "thumbs-down" => Ok(Flag::Failure),
            other => Err(format!("unknown flag '{}' (expected success or failure)", other)),
        }
    }
}

// ── Task ────────────────────────────────────────────────────────

/// The evaluation that most recently labeled a task.
///
/// Only `source` matters to the client; everything else the backend sends is
/// kept in `extra` so a locally patched task still serializes faithfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eval {
    pub source: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub value: Option<Flag>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Eval {
    /// A label given by the project owner.
    pub fn by_owner(flag: Flag) -> Self {
        Eval {
            source: OWNER_SOURCE.to_string(),
            value: Some(flag),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub flag: Option<Flag>,
    #[serde(default)]
    pub last_eval: Option<Eval>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Unix timestamp, seconds.
    pub created_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

impl Task {
    /// True unless the latest label came from the project owner.
    pub fn needs_human_label(&self) -> bool {
        self.last_eval
            .as_ref()
            .map_or(true, |eval| eval.source != OWNER_SOURCE)
    }

    pub fn has_event(&self, event_name: &str) -> bool {
        self.events.iter().any(|e| e.event_name == event_name)
    }

    /// Scalar metadata (strings and numbers) as `(key, rendered value)`, sorted by key.
    ///
    /// Nested objects, arrays, booleans and nulls are skipped.
    pub fn metadata_badges(&self) -> Vec<(String, String)> {
        self.metadata
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key.clone(), s.clone())),
                Value::Number(n) => Some((key.clone(), n.to_string())),
                _ => None,
            })
            .collect()
    }
}

// ── Events ──────────────────────────────────────────────────────

/// A semantic event detected on (or attached by hand to) a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub project_id: String,
    pub event_name: String,
    pub source: String,
    /// Unix timestamp, seconds.
    pub created_at: i64,
}

impl Event {
    /// Created locally and not yet known to the backend.
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_ID_PREFIX)
    }
}

/// Project-level catalog entry describing an event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub event_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

impl EventDefinition {
    /// A definition carrying nothing but the name.
    pub fn bare(event_name: &str) -> Self {
        EventDefinition {
            event_name: event_name.to_string(),
            description: String::new(),
            webhook: None,
        }
    }
}

// ── Projects, topics, users ─────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: BTreeMap<String, EventDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: ProjectSettings,
}

/// A cluster of tasks grouped by the backend around a common subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks_ids: Vec<String>,
}

/// Aggregates for one end user of the monitored application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub user_id: String,
    #[serde(default)]
    pub nb_tasks: u64,
    #[serde(default)]
    pub avg_success_rate: Option<f64>,
    #[serde(default)]
    pub avg_session_length: Option<f64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}
