//! Import and export of process definitions.
//!
//! The payload is decoupled from the runtime entities: step, action and
//! condition IDs inside it are only meaningful within the payload itself,
//! and field connections reference steps and fields by name/key so a
//! definition exported from one environment can be imported into another
//! where every ID differs.

use crate::{
    domain::fields::{
        EntryType, FieldDefinition, FieldPermission, StepFieldLink,
    },
    domain::process::{
        Action, ActionCondition, ActionId, ActionType, ConditionId, Process, ProcessId, Step,
        StepAssignment, StepId, StepType,
    },
    domain::repository::{FieldRepository, ProcessRepository},
    Clock, EngineError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Portable serialization of a full process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExport {
    /// Process name
    pub name: String,
    /// Process code
    pub code: String,
    /// Steps with their actions and conditions
    pub steps: Vec<StepExport>,
    /// Distinct field definitions reachable from this process
    pub entries: Vec<EntryExport>,
    /// Step/field connections, by step name and field key
    pub connections: Vec<ConnectionExport>,
}

/// One step in a payload. The `id` is payload-local and only used to
/// resolve action and condition targets within the same payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExport {
    /// Payload-local step ID
    pub id: String,
    /// Step name
    pub name: String,
    /// Step type
    pub step_type: StepType,
    /// UI ordering hint
    pub order_index: i32,
    /// Expected duration
    pub duration_minutes: Option<u32>,
    /// Who works the step
    pub assignment: Option<StepAssignment>,
    /// Actions offered by the step
    pub actions: Vec<ActionExport>,
}

/// One action in a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExport {
    /// Payload-local action ID
    pub id: String,
    /// Action name
    pub name: String,
    /// Action type
    pub action_type: ActionType,
    /// Payload-local target step ID
    pub target_step_id: Option<String>,
    /// Whether executing requires a comment
    pub is_comment_required: bool,
    /// Timeout in seconds
    pub timeout_seconds: Option<u64>,
    /// Payload-local escalation action ID
    pub timeout_action_id: Option<String>,
    /// Payload-local ID of the fallback condition
    pub default_condition_id: Option<String>,
    /// Conditions in evaluation order
    pub conditions: Vec<ConditionExport>,
}

/// One condition in a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionExport {
    /// Payload-local condition ID
    pub id: String,
    /// Payload-local target step ID
    pub target_step_id: Option<String>,
    /// Boolean rule expression
    pub rule_expression: String,
}

/// A field definition in a payload, identified by key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryExport {
    /// Natural key
    pub key: String,
    /// Display title
    pub title: String,
    /// Input kind
    pub entry_type: EntryType,
    /// Whether a value is mandatory
    pub is_required: bool,
    /// Serialized option list
    pub options: Option<String>,
    /// Validation pattern
    pub validation_regex: Option<String>,
    /// Lower numeric bound
    pub min_value: Option<f64>,
    /// Upper numeric bound
    pub max_value: Option<f64>,
    /// External lookup name
    pub lookup_source: Option<String>,
    /// External dataset reference
    pub external_dataset_id: Option<String>,
}

/// A step/field connection in a payload, fully name-based
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionExport {
    /// Name of the step the field appears on
    pub step_name: String,
    /// Key of the attached field
    pub entry_key: String,
    /// Display order within the form
    pub order_index: i32,
    /// Read/write behavior
    pub permission: FieldPermission,
    /// Visibility expression
    pub visibility_rule: Option<String>,
}

/// Service for moving process definitions between environments
pub struct TransferService {
    process_repo: Arc<dyn ProcessRepository>,
    field_repo: Arc<dyn FieldRepository>,
    clock: Arc<dyn Clock>,
}

impl TransferService {
    /// Create a new transfer service
    pub fn new(
        process_repo: Arc<dyn ProcessRepository>,
        field_repo: Arc<dyn FieldRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            process_repo,
            field_repo,
            clock,
        }
    }

    /// Serialize a process with its fields and connections
    pub async fn export_process(
        &self,
        process_id: &ProcessId,
    ) -> Result<ProcessExport, EngineError> {
        let process = self
            .process_repo
            .find_by_id(process_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Process not found: {}", process_id.0))
            })?;

        let step_ids: Vec<StepId> = process.steps.iter().map(|s| s.id.clone()).collect();
        let links = self.field_repo.links_for_steps(&step_ids).await?;
        let field_ids: Vec<_> = links.iter().map(|l| l.field_id.clone()).collect();
        let fields = self.field_repo.find_by_ids(&field_ids).await?;
        let fields_by_id: HashMap<&str, &FieldDefinition> =
            fields.iter().map(|f| (f.id.0.as_str(), f)).collect();
        let step_names: HashMap<&str, &str> = process
            .steps
            .iter()
            .map(|s| (s.id.0.as_str(), s.name.as_str()))
            .collect();

        let steps = process
            .steps
            .iter()
            .map(|step| StepExport {
                id: step.id.0.clone(),
                name: step.name.clone(),
                step_type: step.step_type,
                order_index: step.order_index,
                duration_minutes: step.duration_minutes,
                assignment: step.assignment.clone(),
                actions: step
                    .actions
                    .iter()
                    .map(|action| ActionExport {
                        id: action.id.0.clone(),
                        name: action.name.clone(),
                        action_type: action.action_type,
                        target_step_id: action.target_step_id.as_ref().map(|s| s.0.clone()),
                        is_comment_required: action.is_comment_required,
                        timeout_seconds: action.timeout_seconds,
                        timeout_action_id: action
                            .timeout_action_id
                            .as_ref()
                            .map(|a| a.0.clone()),
                        default_condition_id: action
                            .default_condition_id
                            .as_ref()
                            .map(|c| c.0.clone()),
                        conditions: action
                            .conditions
                            .iter()
                            .map(|condition| ConditionExport {
                                id: condition.id.0.clone(),
                                target_step_id: condition
                                    .target_step_id
                                    .as_ref()
                                    .map(|s| s.0.clone()),
                                rule_expression: condition.rule_expression.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        // Distinct fields, in first-seen link order
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::new();
        let mut connections = Vec::new();
        for link in &links {
            let Some(field) = fields_by_id.get(link.field_id.0.as_str()) else {
                continue;
            };
            if seen.insert(field.key.as_str()) {
                entries.push(EntryExport {
                    key: field.key.clone(),
                    title: field.title.clone(),
                    entry_type: field.entry_type,
                    is_required: field.is_required,
                    options: field.options.clone(),
                    validation_regex: field.validation_regex.clone(),
                    min_value: field.min_value,
                    max_value: field.max_value,
                    lookup_source: field.lookup_source.clone(),
                    external_dataset_id: field.external_dataset_id.clone(),
                });
            }
            if let Some(step_name) = step_names.get(link.step_id.0.as_str()) {
                connections.push(ConnectionExport {
                    step_name: (*step_name).to_string(),
                    entry_key: field.key.clone(),
                    order_index: link.order_index,
                    permission: link.permission,
                    visibility_rule: link.visibility_rule.clone(),
                });
            }
        }

        Ok(ProcessExport {
            name: process.name.clone(),
            code: process.code.clone(),
            steps,
            entries,
            connections,
        })
    }

    /// Serialize a process to a JSON string
    pub async fn export_json(&self, process_id: &ProcessId) -> Result<String, EngineError> {
        let export = self.export_process(process_id).await?;
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import a previously exported definition.
    ///
    /// Fields are upserted by key; an existing definition is overwritten in
    /// place with its ID preserved, which can redefine a field other
    /// processes use, so each overwrite is logged. Steps get fresh IDs
    /// before actions are rebuilt; targets that cannot be resolved inside
    /// the payload are nulled out rather than carried over. When the code
    /// is already taken the import lands as an inactive draft at the next
    /// version; otherwise it becomes the active version 1. The whole graph
    /// commits atomically.
    pub async fn import_process(
        &self,
        export: &ProcessExport,
        actor_user_id: &str,
    ) -> Result<Process, EngineError> {
        if export.name.trim().is_empty() || export.code.trim().is_empty() {
            return Err(EngineError::Validation(
                "Import payload is missing the process name or code".to_string(),
            ));
        }
        if export.steps.is_empty() {
            return Err(EngineError::Validation(
                "Import payload has no steps".to_string(),
            ));
        }

        // Upsert fields by key, collecting the rows for the atomic commit
        let mut fields = Vec::new();
        let mut field_id_by_key = HashMap::new();
        for entry in &export.entries {
            let field = match self.field_repo.find_by_key(&entry.key).await? {
                Some(existing) => {
                    tracing::warn!(
                        field_key = %entry.key,
                        field_id = %existing.id.0,
                        "Import overwrites an existing field definition"
                    );
                    FieldDefinition {
                        id: existing.id,
                        key: entry.key.clone(),
                        title: entry.title.clone(),
                        entry_type: entry.entry_type,
                        is_required: entry.is_required,
                        options: entry.options.clone(),
                        validation_regex: entry.validation_regex.clone(),
                        min_value: entry.min_value,
                        max_value: entry.max_value,
                        lookup_source: entry.lookup_source.clone(),
                        external_dataset_id: entry.external_dataset_id.clone(),
                    }
                }
                None => {
                    let mut field = FieldDefinition::new(
                        &entry.key,
                        &entry.title,
                        entry.entry_type,
                        entry.is_required,
                    );
                    field.options = entry.options.clone();
                    field.validation_regex = entry.validation_regex.clone();
                    field.min_value = entry.min_value;
                    field.max_value = entry.max_value;
                    field.lookup_source = entry.lookup_source.clone();
                    field.external_dataset_id = entry.external_dataset_id.clone();
                    field
                }
            };
            field_id_by_key.insert(entry.key.clone(), field.id.clone());
            fields.push(field);
        }

        let (version, is_active) =
            match self.process_repo.max_version_for_code(&export.code).await? {
                Some(max) => (max + 1, false),
                None => (1, true),
            };

        let now = self.clock.now();
        let process_id = ProcessId::new();

        // Fresh step IDs first, then actions and conditions resolve their
        // targets against the map. Unresolvable payload references are
        // dropped, not carried over.
        let step_map: HashMap<&str, StepId> = export
            .steps
            .iter()
            .map(|s| (s.id.as_str(), StepId::new()))
            .collect();
        let action_map: HashMap<&str, ActionId> = export
            .steps
            .iter()
            .flat_map(|s| &s.actions)
            .map(|a| (a.id.as_str(), ActionId::new()))
            .collect();

        let map_step =
            |id: &Option<String>| -> Option<StepId> {
                id.as_ref().and_then(|old| step_map.get(old.as_str()).cloned())
            };

        let steps: Vec<Step> = export
            .steps
            .iter()
            .map(|step| {
                let new_step_id = step_map[step.id.as_str()].clone();
                let actions: Vec<Action> = step
                    .actions
                    .iter()
                    .map(|action| {
                        let new_action_id = action_map[action.id.as_str()].clone();
                        let mut condition_map: HashMap<&str, ConditionId> = HashMap::new();
                        let conditions: Vec<ActionCondition> = action
                            .conditions
                            .iter()
                            .map(|condition| {
                                let new_id = ConditionId::new();
                                condition_map.insert(condition.id.as_str(), new_id.clone());
                                ActionCondition {
                                    id: new_id,
                                    action_id: new_action_id.clone(),
                                    target_step_id: map_step(&condition.target_step_id),
                                    rule_expression: condition.rule_expression.clone(),
                                }
                            })
                            .collect();
                        Action {
                            id: new_action_id,
                            step_id: new_step_id.clone(),
                            name: action.name.clone(),
                            action_type: action.action_type,
                            target_step_id: map_step(&action.target_step_id),
                            is_comment_required: action.is_comment_required,
                            timeout_seconds: action.timeout_seconds,
                            timeout_action_id: action
                                .timeout_action_id
                                .as_ref()
                                .and_then(|old| action_map.get(old.as_str()).cloned()),
                            default_condition_id: action
                                .default_condition_id
                                .as_ref()
                                .and_then(|old| condition_map.get(old.as_str()).cloned()),
                            conditions,
                        }
                    })
                    .collect();
                Step {
                    id: new_step_id,
                    process_id: process_id.clone(),
                    name: step.name.clone(),
                    step_type: step.step_type,
                    order_index: step.order_index,
                    duration_minutes: step.duration_minutes,
                    assignment: step.assignment.clone(),
                    actions,
                }
            })
            .collect();

        let step_id_by_name: HashMap<&str, &StepId> =
            steps.iter().map(|s| (s.name.as_str(), &s.id)).collect();
        let mut links = Vec::new();
        for connection in &export.connections {
            let (Some(step_id), Some(field_id)) = (
                step_id_by_name.get(connection.step_name.as_str()),
                field_id_by_key.get(&connection.entry_key),
            ) else {
                tracing::warn!(
                    step_name = %connection.step_name,
                    entry_key = %connection.entry_key,
                    "Skipping unresolvable connection in import"
                );
                continue;
            };
            let mut link = StepFieldLink::new((*step_id).clone(), field_id.clone());
            link.order_index = connection.order_index;
            link.permission = connection.permission;
            link.visibility_rule = connection.visibility_rule.clone();
            links.push(link);
        }

        let process = Process {
            id: process_id,
            name: export.name.clone(),
            code: export.code.clone(),
            version,
            is_active,
            parent_process_id: None,
            steps,
            created_at: now,
            updated_at: now,
        };
        process.validate()?;

        self.process_repo
            .save_graph(&process, &fields, &links, None)
            .await?;

        tracing::info!(
            process_id = %process.id.0,
            code = %process.code,
            version = process.version,
            is_active = process.is_active,
            actor = %actor_user_id,
            "Process imported"
        );
        Ok(process)
    }

    /// Import a definition from a JSON string
    pub async fn import_json(
        &self,
        payload: &str,
        actor_user_id: &str,
    ) -> Result<Process, EngineError> {
        let export: ProcessExport = serde_json::from_str(payload)?;
        self.import_process(&export, actor_user_id).await
    }
}
