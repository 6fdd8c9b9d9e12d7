use crate::{
    domain::events::StateChanged,
    domain::fields::{FieldDefinition, FieldId, FieldPermission},
    domain::history::HistoryRecord,
    domain::process::{Action, ActionId, Process, Step, StepAssignment, StepId, StepType},
    domain::repository::{FieldRepository, ProcessRepository, RequestRepository},
    domain::request::{FieldValue, ProcessRequest, RequestId, RequestStatus, RequestValue},
    Clock, EngineError, FormValues, RequestNumberGenerator, RuleEvaluator, StateChangedHandler,
};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

/// How a caller names the action to execute
#[derive(Debug, Clone)]
pub enum ActionRef {
    /// By action ID
    Id(ActionId),
    /// By name, matched case-insensitively within the current step
    Name(String),
}

/// A request waiting on a user, with what the user can do about it
#[derive(Debug, Clone)]
pub struct UserTask {
    /// The waiting request
    pub request: ProcessRequest,
    /// Name of the owning process
    pub process_name: String,
    /// Name of the step the request is waiting on
    pub step_name: String,
    /// Actions the step offers
    pub actions: Vec<Action>,
}

/// Service for starting requests and driving them through their process
pub struct ExecutionService {
    process_repo: Arc<dyn ProcessRepository>,
    field_repo: Arc<dyn FieldRepository>,
    request_repo: Arc<dyn RequestRepository>,
    evaluator: Arc<dyn RuleEvaluator>,
    numbers: Arc<dyn RequestNumberGenerator>,
    clock: Arc<dyn Clock>,
    state_changed: Arc<dyn StateChangedHandler>,
}

impl ExecutionService {
    /// Create a new execution service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_repo: Arc<dyn ProcessRepository>,
        field_repo: Arc<dyn FieldRepository>,
        request_repo: Arc<dyn RequestRepository>,
        evaluator: Arc<dyn RuleEvaluator>,
        numbers: Arc<dyn RequestNumberGenerator>,
        clock: Arc<dyn Clock>,
        state_changed: Arc<dyn StateChangedHandler>,
    ) -> Self {
        Self {
            process_repo,
            field_repo,
            request_repo,
            evaluator,
            numbers,
            clock,
            state_changed,
        }
    }

    /// Start a new request on the active generation of a process code. The
    /// request lands on the Start step with the given initial form values,
    /// and its started history record is written in the same commit.
    pub async fn start_process(
        &self,
        process_code: &str,
        initiator_user_id: &str,
        values: &FormValues,
    ) -> Result<ProcessRequest, EngineError> {
        let process = self
            .process_repo
            .find_active_by_code(process_code)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Process not found or inactive: {}",
                    process_code
                ))
            })?;
        self.start_on(process, initiator_user_id, values).await
    }

    /// Start a request on a specific process generation. Unlike
    /// [`ExecutionService::start_process`] this addresses a generation
    /// directly; starting on a deactivated one is an invalid-state error.
    pub async fn start_process_by_id(
        &self,
        process_id: &crate::ProcessId,
        initiator_user_id: &str,
        values: &FormValues,
    ) -> Result<ProcessRequest, EngineError> {
        let process = self
            .process_repo
            .find_by_id(process_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Process not found: {}", process_id.0))
            })?;
        if !process.is_active {
            return Err(EngineError::InvalidState(format!(
                "Process '{}' v{} is not active",
                process.code, process.version
            )));
        }
        self.start_on(process, initiator_user_id, values).await
    }

    async fn start_on(
        &self,
        process: Process,
        initiator_user_id: &str,
        values: &FormValues,
    ) -> Result<ProcessRequest, EngineError> {
        process.validate()?;
        let start = process.start_step()?;

        let form = self.step_form(&start.id).await?;
        let converted = convert_values(&form, values, &HashMap::new())?;

        let now = self.clock.now();
        // Duplicate numbers are rare; regenerate and retry a couple of
        // times before giving up.
        let mut last_err = None;
        for _ in 0..3 {
            let mut request = ProcessRequest::new(
                process.id.clone(),
                start.id.clone(),
                initiator_user_id,
                self.numbers.next(),
                now,
            );
            request.due_date = due_date_for(start, now);
            let started = HistoryRecord::started(
                request.id.clone(),
                start.id.clone(),
                initiator_user_id,
                now,
            );
            let rows: Vec<RequestValue> = converted
                .iter()
                .map(|(field_id, value)| {
                    RequestValue::new(request.id.clone(), field_id.clone(), value.clone())
                })
                .collect();
            match self.request_repo.create(&request, &started, &rows).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %request.id.0,
                        request_number = %request.request_number,
                        process_id = %process.id.0,
                        initiator = %initiator_user_id,
                        "Request started"
                    );
                    self.dispatch(&process, &request).await;
                    return Ok(request);
                }
                Err(err @ EngineError::Validation(_)) => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            EngineError::Internal("Failed to allocate a request number".to_string())
        }))
    }

    /// Execute an action on a request's current step.
    ///
    /// Submitted values are validated against the step's writable fields
    /// and persisted in the same commit as the transition. The target step
    /// is resolved from the action's conditions in their stored order,
    /// first true wins; with no match the default condition applies, then
    /// the action's own target, and with none of those the request stays
    /// on its current step. Reaching an End step completes the request.
    pub async fn execute(
        &self,
        request_id: &RequestId,
        action: &ActionRef,
        actor_user_id: &str,
        comment: Option<&str>,
        values: &FormValues,
    ) -> Result<ProcessRequest, EngineError> {
        let mut request = self
            .request_repo
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Request not found: {}", request_id.0))
            })?;
        request.ensure_active()?;
        let expected_revision = request.revision;

        let process = self
            .process_repo
            .find_by_id(&request.process_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Process not found: {}", request.process_id.0))
            })?;
        let current = process.step(&request.current_step_id).ok_or_else(|| {
            EngineError::InvalidState(format!(
                "Request {} sits on a step missing from its process",
                request.request_number
            ))
        })?;

        let action = resolve_action(current, action)?;
        if action.is_comment_required && comment.map_or(true, |c| c.trim().is_empty()) {
            return Err(EngineError::Validation(format!(
                "Action '{}' requires a comment",
                action.name
            )));
        }

        let form = self.step_form(&current.id).await?;
        let stored = self.request_repo.values_for(&request.id).await?;
        let stored_by_field: HashMap<&str, &FieldValue> = stored
            .iter()
            .map(|v| (v.field_id.0.as_str(), &v.value))
            .collect();
        let converted = convert_values(&form, values, &stored_by_field)?;

        // Stored values overlaid with this submission, keyed by field key,
        // feed the rule evaluator.
        let merged = merge_for_rules(&form, &stored, &converted);

        let target_id = resolve_target(action, &merged, self.evaluator.as_ref());
        let target = match &target_id {
            Some(id) => process.step(id).ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "Action '{}' targets a step missing from its process",
                    action.name
                ))
            })?,
            None => current,
        };

        let now = self.clock.now();
        request.current_step_id = target.id.clone();
        if target.step_type == StepType::End {
            request.status = RequestStatus::Completed;
            request.due_date = None;
        } else {
            request.due_date = due_date_for(target, now);
        }
        request.revision = expected_revision + 1;
        request.updated_at = now;

        let history = HistoryRecord::transition(
            request.id.clone(),
            current.id.clone(),
            target.id.clone(),
            action.id.clone(),
            actor_user_id,
            now,
            comment.map(|c| c.to_string()),
        );
        let rows: Vec<RequestValue> = converted
            .iter()
            .map(|(field_id, value)| {
                RequestValue::new(request.id.clone(), field_id.clone(), value.clone())
            })
            .collect();

        self.request_repo
            .commit_transition(&request, expected_revision, &history, &rows)
            .await?;

        tracing::info!(
            request_id = %request.id.0,
            request_number = %request.request_number,
            action = %action.name,
            from_step = %current.id.0,
            to_step = %target.id.0,
            status = ?request.status,
            actor = %actor_user_id,
            "Request transitioned"
        );
        self.dispatch(&process, &request).await;
        Ok(request)
    }

    /// List active requests waiting on the given user.
    ///
    /// A step with no assignment is visible to everyone. A user
    /// assignment matches the user ID, a role assignment matches any of
    /// the caller-supplied roles, and a dynamic-field assignment matches
    /// when the request's stored value for that field equals the user ID.
    pub async fn get_user_tasks(
        &self,
        user_id: &str,
        roles: &[String],
    ) -> Result<Vec<UserTask>, EngineError> {
        let requests = self
            .request_repo
            .list_by_status(RequestStatus::Active)
            .await?;

        let mut processes: HashMap<String, Process> = HashMap::new();
        let mut tasks = Vec::new();
        for request in requests {
            let process = match processes.get(&request.process_id.0) {
                Some(p) => p.clone(),
                None => {
                    let Some(p) = self.process_repo.find_by_id(&request.process_id).await? else {
                        tracing::warn!(
                            request_id = %request.id.0,
                            process_id = %request.process_id.0,
                            "Skipping request of a missing process"
                        );
                        continue;
                    };
                    processes.insert(request.process_id.0.clone(), p.clone());
                    p
                }
            };
            let Some(step) = process.step(&request.current_step_id) else {
                continue;
            };
            if !self.assigned_to(step, &request, user_id, roles).await? {
                continue;
            }
            tasks.push(UserTask {
                process_name: process.name.clone(),
                step_name: step.name.clone(),
                actions: step.actions.clone(),
                request,
            });
        }
        tasks.sort_by(|a, b| a.request.created_at.cmp(&b.request.created_at));
        Ok(tasks)
    }

    async fn assigned_to(
        &self,
        step: &Step,
        request: &ProcessRequest,
        user_id: &str,
        roles: &[String],
    ) -> Result<bool, EngineError> {
        match &step.assignment {
            None => Ok(true),
            Some(StepAssignment::User(u)) => Ok(u == user_id),
            Some(StepAssignment::Role(r)) => Ok(roles.iter().any(|have| have == r)),
            Some(StepAssignment::DynamicField(key)) => {
                let Some(field) = self.field_repo.find_by_key(key).await? else {
                    return Ok(false);
                };
                let values = self.request_repo.values_for(&request.id).await?;
                Ok(values
                    .iter()
                    .any(|v| v.field_id == field.id && v.value.to_display_string() == user_id))
            }
        }
    }

    async fn step_form(
        &self,
        step_id: &StepId,
    ) -> Result<Vec<(FieldDefinition, FieldPermission)>, EngineError> {
        let links = self.field_repo.links_for_step(step_id).await?;
        let ids: Vec<FieldId> = links.iter().map(|l| l.field_id.clone()).collect();
        let fields = self.field_repo.find_by_ids(&ids).await?;
        let by_id: HashMap<&str, &FieldDefinition> =
            fields.iter().map(|f| (f.id.0.as_str(), f)).collect();
        Ok(links
            .iter()
            .filter_map(|l| {
                by_id
                    .get(l.field_id.0.as_str())
                    .map(|f| ((*f).clone(), l.permission))
            })
            .collect())
    }

    async fn dispatch(&self, process: &Process, request: &ProcessRequest) {
        let event = StateChanged {
            request_id: request.id.clone(),
            process_id: process.id.clone(),
            step_id: request.current_step_id.clone(),
            status: request.status,
            occurred_at: request.updated_at,
        };
        if let Err(err) = self.state_changed.handle(event).await {
            tracing::warn!(
                request_id = %request.id.0,
                error = %err,
                "State change handler failed"
            );
        }
    }
}

fn resolve_action<'a>(step: &'a Step, action: &ActionRef) -> Result<&'a Action, EngineError> {
    let found = match action {
        ActionRef::Id(id) => step.action_by_id(id),
        ActionRef::Name(name) => step.action_by_name(name),
    };
    found.ok_or_else(|| {
        let label = match action {
            ActionRef::Id(id) => id.0.clone(),
            ActionRef::Name(name) => name.clone(),
        };
        EngineError::NotFound(format!(
            "Action '{}' not available on step '{}'",
            label, step.name
        ))
    })
}

/// Pick the target step for an action: ordered conditions first, then the
/// default condition, then the action's own target. `None` means stay.
fn resolve_target(
    action: &Action,
    values: &FormValues,
    evaluator: &dyn RuleEvaluator,
) -> Option<StepId> {
    for condition in &action.conditions {
        if evaluator.evaluate(&condition.rule_expression, values) {
            return condition.target_step_id.clone();
        }
    }
    if let Some(default_id) = &action.default_condition_id {
        if let Some(condition) = action.condition(default_id) {
            return condition.target_step_id.clone();
        }
    }
    action.target_step_id.clone()
}

fn due_date_for(step: &Step, now: chrono::DateTime<chrono::Utc>) -> Option<chrono::DateTime<chrono::Utc>> {
    step.duration_minutes
        .map(|minutes| now + Duration::minutes(i64::from(minutes)))
}

/// Validate submitted values against a step's form and convert them to
/// typed values. Unknown keys and read-only fields are rejected; required
/// writable fields must end up with a value, submitted now or stored
/// earlier.
fn convert_values(
    form: &[(FieldDefinition, FieldPermission)],
    submitted: &FormValues,
    stored_by_field: &HashMap<&str, &FieldValue>,
) -> Result<Vec<(FieldId, FieldValue)>, EngineError> {
    let by_key: HashMap<&str, &(FieldDefinition, FieldPermission)> =
        form.iter().map(|entry| (entry.0.key.as_str(), entry)).collect();

    let mut converted = Vec::new();
    for (key, raw) in submitted {
        let Some((field, permission)) = by_key.get(key.as_str()).map(|e| (&e.0, e.1)) else {
            return Err(EngineError::Validation(format!(
                "Field '{}' is not part of this step's form",
                key
            )));
        };
        if permission != FieldPermission::Write {
            return Err(EngineError::Validation(format!(
                "Field '{}' is read-only on this step",
                key
            )));
        }
        if raw.is_null() {
            continue;
        }
        let value = FieldValue::from_json(field.entry_type, raw).ok_or_else(|| {
            EngineError::Validation(format!(
                "Value for field '{}' does not match its type {:?}",
                key, field.entry_type
            ))
        })?;
        converted.push((field.id.clone(), value));
    }

    for (field, permission) in form {
        if !field.is_required || *permission != FieldPermission::Write {
            continue;
        }
        let submitted_now = converted.iter().any(|(id, _)| id == &field.id);
        let stored_before = stored_by_field.contains_key(field.id.0.as_str());
        if !submitted_now && !stored_before {
            return Err(EngineError::Validation(format!(
                "Required field '{}' has no value",
                field.key
            )));
        }
    }
    Ok(converted)
}

fn merge_for_rules(
    form: &[(FieldDefinition, FieldPermission)],
    stored: &[RequestValue],
    converted: &[(FieldId, FieldValue)],
) -> FormValues {
    let key_of: HashMap<&str, &str> = form
        .iter()
        .map(|(f, _)| (f.id.0.as_str(), f.key.as_str()))
        .collect();
    let mut merged = FormValues::new();
    for value in stored {
        if let Some(key) = key_of.get(value.field_id.0.as_str()) {
            merged.insert((*key).to_string(), value.value.to_json());
        }
    }
    for (field_id, value) in converted {
        if let Some(key) = key_of.get(field_id.0.as_str()) {
            merged.insert((*key).to_string(), value.to_json());
        }
    }
    merged
}
