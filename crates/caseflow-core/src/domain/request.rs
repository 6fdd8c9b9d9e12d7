use crate::domain::fields::{EntryType, FieldId};
use crate::domain::process::{ProcessId, StepId};
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of a running request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// In flight; the only status `execute` accepts
    Active,
    /// Reached an End step
    Completed,
    /// Cancelled by an outer layer
    Cancelled,
    /// Rejected by an outer layer
    Rejected,
}

/// Aggregate: one running instance of a process.
///
/// `current_step_id` and `status` mutate only through the execution engine.
/// Requests are never deleted; they outlive the generation of the process
/// that spawned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Unique identifier
    pub id: RequestId,

    /// The process generation this request runs against
    pub process_id: ProcessId,

    /// The step the request is currently at
    pub current_step_id: StepId,

    /// Lifecycle status
    pub status: RequestStatus,

    /// User who started the request
    pub initiator_user_id: String,

    /// Globally unique, human-facing number
    pub request_number: String,

    /// Optional due date for the whole request
    pub due_date: Option<DateTime<Utc>>,

    /// Optimistic concurrency token; compare-and-swap on every transition
    pub revision: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ProcessRequest {
    /// Create a new Active request anchored at a process's start step
    pub fn new(
        process_id: ProcessId,
        start_step_id: StepId,
        initiator_user_id: &str,
        request_number: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            process_id,
            current_step_id: start_step_id,
            status: RequestStatus::Active,
            initiator_user_id: initiator_user_id.to_string(),
            request_number,
            due_date: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Guard: the request must be Active for an action to execute
    pub fn ensure_active(&self) -> Result<(), EngineError> {
        if self.status != RequestStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "Cannot execute an action on request {} in status {:?}",
                self.request_number, self.status
            )));
        }
        Ok(())
    }
}

/// A typed form value. Exactly one representation per value, selected by
/// the owning field's [`EntryType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text, Select, File and UserSelect fields
    Text(String),
    /// Whole-number values
    Number(i64),
    /// Fractional number values
    Decimal(f64),
    /// Date fields
    Date(DateTime<Utc>),
    /// Checkbox fields
    Bool(bool),
}

impl FieldValue {
    /// Convert a submitted JSON value into the slot the field's entry type
    /// dictates. Returns `None` when the value cannot be represented, so
    /// callers can skip it rather than abort the transition.
    pub fn from_json(entry_type: EntryType, value: &serde_json::Value) -> Option<Self> {
        match entry_type {
            EntryType::Text | EntryType::Select | EntryType::File | EntryType::UserSelect => {
                match value {
                    serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
                    serde_json::Value::Null => None,
                    other => Some(FieldValue::Text(other.to_string())),
                }
            }
            EntryType::Number => {
                if let Some(i) = value.as_i64() {
                    Some(FieldValue::Number(i))
                } else {
                    value.as_f64().map(FieldValue::Decimal)
                }
            }
            EntryType::Date => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| FieldValue::Date(dt.with_timezone(&Utc))),
            EntryType::Checkbox => value.as_bool().map(FieldValue::Bool),
        }
    }

    /// JSON form handed to rule evaluators
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Number(i) => serde_json::json!(i),
            FieldValue::Decimal(d) => serde_json::json!(d),
            FieldValue::Date(dt) => serde_json::Value::String(dt.to_rfc3339()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Stringified form used by `{{key}}` template substitution
    pub fn to_display_string(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(i) => i.to_string(),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Date(dt) => dt.to_rfc3339(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

/// Sparse form value attached to a request. One row per (request, field);
/// re-submissions overwrite in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestValue {
    /// Unique identifier
    pub id: String,

    /// Owning request
    pub request_id: RequestId,

    /// The field this value belongs to
    pub field_id: FieldId,

    /// The typed value
    pub value: FieldValue,
}

impl RequestValue {
    /// Create a value row
    pub fn new(request_id: RequestId, field_id: FieldId, value: FieldValue) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            field_id,
            value,
        }
    }
}
