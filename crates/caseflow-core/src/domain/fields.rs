use crate::domain::process::StepId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: Field definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

/// Value object: Step/field link ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl FieldId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl LinkId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for FieldId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

/// Input kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Free text
    Text,
    /// Integer or decimal number
    Number,
    /// Calendar date
    Date,
    /// Choice from a configured option list
    Select,
    /// File upload reference
    File,
    /// Boolean toggle
    Checkbox,
    /// Reference to a user account
    UserSelect,
}

/// How a field behaves on a given step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPermission {
    /// Displayed read-only
    Read,
    /// Editable
    Write,
}

/// A reusable field/form-input definition.
///
/// Fields are process-agnostic: the same definition can be attached to many
/// steps across many processes via [`StepFieldLink`]. Deleting a step never
/// deletes a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Unique identifier
    pub id: FieldId,

    /// Natural key, unique across all fields. Used in form-value storage,
    /// import matching and `{{key}}` template placeholders.
    pub key: String,

    /// Display title
    pub title: String,

    /// Input kind; selects the typed slot a stored value uses
    pub entry_type: EntryType,

    /// Whether a value must be supplied
    pub is_required: bool,

    /// Serialized choice list for Select fields
    pub options: Option<String>,

    /// Optional validation pattern for Text fields
    pub validation_regex: Option<String>,

    /// Lower bound for Number fields
    pub min_value: Option<f64>,

    /// Upper bound for Number fields
    pub max_value: Option<f64>,

    /// Name of an external lookup feeding Select options
    pub lookup_source: Option<String>,

    /// Reference to an external dataset backing this field
    pub external_dataset_id: Option<String>,
}

impl FieldDefinition {
    /// Create a definition with just the commonly-set attributes
    pub fn new(key: &str, title: &str, entry_type: EntryType, is_required: bool) -> Self {
        Self {
            id: FieldId::new(),
            key: key.to_string(),
            title: title.to_string(),
            entry_type,
            is_required,
            options: None,
            validation_regex: None,
            min_value: None,
            max_value: None,
            lookup_source: None,
            external_dataset_id: None,
        }
    }
}

/// Join entity attaching a [`FieldDefinition`] to a step with per-step
/// ordering, permission and visibility metadata.
///
/// This indirection is why cloning a process re-links connections against
/// the new step ids while reusing field ids unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFieldLink {
    /// Unique identifier
    pub id: LinkId,

    /// The step the field appears on
    pub step_id: StepId,

    /// The attached field definition
    pub field_id: FieldId,

    /// Display order within the step's form
    pub order_index: i32,

    /// Read/write behavior on this step
    pub permission: FieldPermission,

    /// Optional expression controlling visibility
    pub visibility_rule: Option<String>,
}

impl StepFieldLink {
    /// Link a field to a step with the authoring defaults
    pub fn new(step_id: StepId, field_id: FieldId) -> Self {
        Self {
            id: LinkId::new(),
            step_id,
            field_id,
            order_index: 0,
            permission: FieldPermission::Write,
            visibility_rule: None,
        }
    }
}
