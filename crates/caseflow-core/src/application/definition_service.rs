use crate::{
    domain::fields::{
        EntryType, FieldDefinition, FieldId, FieldPermission, LinkId, StepFieldLink,
    },
    domain::process::{
        Action, ActionCondition, ActionId, ActionType, ConditionId, Process, ProcessId, Step,
        StepAssignment, StepId, StepType,
    },
    domain::repository::{FieldRepository, ProcessRepository},
    Clock, EngineError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A field definition together with its step link
#[derive(Debug, Clone)]
pub struct FieldBinding {
    /// The link carrying order and permission for this step
    pub link: StepFieldLink,
    /// The shared field definition
    pub field: FieldDefinition,
}

/// One step of a process together with its form
#[derive(Debug, Clone)]
pub struct StepView {
    /// The step itself, actions included
    pub step: Step,
    /// Form fields for the step, sorted by link order
    pub fields: Vec<FieldBinding>,
}

/// A full process definition: graph plus per-step forms
#[derive(Debug, Clone)]
pub struct ProcessDefinitionView {
    /// The process graph
    pub process: Process,
    /// Steps sorted by order index, each with its form
    pub steps: Vec<StepView>,
}

/// Service for authoring process graphs and their forms
pub struct DefinitionService {
    process_repo: Arc<dyn ProcessRepository>,
    field_repo: Arc<dyn FieldRepository>,
    clock: Arc<dyn Clock>,
}

impl DefinitionService {
    /// Create a new definition service
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

    /// Create an empty active process at version 1. The code must not be
    /// held by another active process.
    pub async fn create_process(
        &self,
        name: &str,
        code: &str,
        actor_user_id: &str,
    ) -> Result<Process, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Process name must not be empty".to_string(),
            ));
        }
        if code.trim().is_empty() {
            return Err(EngineError::Validation(
                "Process code must not be empty".to_string(),
            ));
        }
        if self.process_repo.find_active_by_code(code).await?.is_some() {
            return Err(EngineError::Validation(format!(
                "An active process with code '{}' already exists",
                code
            )));
        }

        let process = Process::new(name, code, self.clock.now());
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            code = %process.code,
            actor = %actor_user_id,
            "Process created"
        );
        Ok(process)
    }

    /// Append a step to a process graph
    #[allow(clippy::too_many_arguments)]
    pub async fn add_step(
        &self,
        process_id: &ProcessId,
        name: &str,
        step_type: StepType,
        order_index: i32,
        duration_minutes: Option<u32>,
        assignment: Option<StepAssignment>,
        actor_user_id: &str,
    ) -> Result<StepId, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Step name must not be empty".to_string(),
            ));
        }
        let mut process = self.load(process_id).await?;

        if step_type == StepType::Start && process.steps.iter().any(|s| s.step_type == StepType::Start)
        {
            return Err(EngineError::Validation(
                "Process already has a Start step".to_string(),
            ));
        }

        let step = Step {
            id: StepId::new(),
            process_id: process.id.clone(),
            name: name.to_string(),
            step_type,
            order_index,
            duration_minutes,
            assignment,
            actions: Vec::new(),
        };
        let step_id = step.id.clone();
        process.steps.push(step);
        process.updated_at = self.clock.now();
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            step_id = %step_id.0,
            actor = %actor_user_id,
            "Step added"
        );
        Ok(step_id)
    }

    /// Add an action to a step. Action names are unique per step,
    /// case-insensitively. A `None` target means the request stays on the
    /// current step when the action fires without a matching condition.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_action(
        &self,
        process_id: &ProcessId,
        step_id: &StepId,
        name: &str,
        action_type: ActionType,
        target_step_id: Option<StepId>,
        is_comment_required: bool,
        actor_user_id: &str,
    ) -> Result<ActionId, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Action name must not be empty".to_string(),
            ));
        }
        let mut process = self.load(process_id).await?;

        if let Some(target) = &target_step_id {
            if process.step(target).is_none() {
                return Err(EngineError::Validation(format!(
                    "Target step not found in process: {}",
                    target.0
                )));
            }
        }

        let step = process.step_mut(step_id).ok_or_else(|| {
            EngineError::NotFound(format!("Step not found: {}", step_id.0))
        })?;
        if step.action_by_name(name).is_some() {
            return Err(EngineError::Validation(format!(
                "Step '{}' already has an action named '{}'",
                step.name, name
            )));
        }

        let action = Action {
            id: ActionId::new(),
            step_id: step.id.clone(),
            name: name.to_string(),
            action_type,
            target_step_id,
            is_comment_required,
            timeout_seconds: None,
            timeout_action_id: None,
            default_condition_id: None,
            conditions: Vec::new(),
        };
        let action_id = action.id.clone();
        step.actions.push(action);
        process.updated_at = self.clock.now();
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            step_id = %step_id.0,
            action_id = %action_id.0,
            actor = %actor_user_id,
            "Action added"
        );
        Ok(action_id)
    }

    /// Append a condition to an action. Conditions are evaluated in the
    /// order they were added, first true wins.
    pub async fn add_condition(
        &self,
        process_id: &ProcessId,
        action_id: &ActionId,
        target_step_id: Option<StepId>,
        rule_expression: &str,
        actor_user_id: &str,
    ) -> Result<ConditionId, EngineError> {
        let mut process = self.load(process_id).await?;

        if let Some(target) = &target_step_id {
            if process.step(target).is_none() {
                return Err(EngineError::Validation(format!(
                    "Target step not found in process: {}",
                    target.0
                )));
            }
        }

        let action = find_action_mut(&mut process, action_id)?;
        let condition = ActionCondition {
            id: ConditionId::new(),
            action_id: action.id.clone(),
            target_step_id,
            rule_expression: rule_expression.to_string(),
        };
        let condition_id = condition.id.clone();
        action.conditions.push(condition);
        process.updated_at = self.clock.now();
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            action_id = %action_id.0,
            condition_id = %condition_id.0,
            actor = %actor_user_id,
            "Condition added"
        );
        Ok(condition_id)
    }

    /// Mark one of an action's conditions as the fallback used when no
    /// condition evaluates true
    pub async fn set_default_condition(
        &self,
        process_id: &ProcessId,
        action_id: &ActionId,
        condition_id: &ConditionId,
        actor_user_id: &str,
    ) -> Result<(), EngineError> {
        let mut process = self.load(process_id).await?;
        let action = find_action_mut(&mut process, action_id)?;
        if action.condition(condition_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "Condition not found on action: {}",
                condition_id.0
            )));
        }
        action.default_condition_id = Some(condition_id.clone());
        process.updated_at = self.clock.now();
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            action_id = %action_id.0,
            actor = %actor_user_id,
            "Default condition set"
        );
        Ok(())
    }

    /// Configure a timeout on an action. When a request lingers on the
    /// action's step past the timeout, the sweep reports it, optionally
    /// naming an escalation action.
    pub async fn configure_timeout(
        &self,
        process_id: &ProcessId,
        action_id: &ActionId,
        timeout_seconds: Option<u64>,
        timeout_action_id: Option<ActionId>,
        actor_user_id: &str,
    ) -> Result<(), EngineError> {
        let mut process = self.load(process_id).await?;

        if let Some(escalation) = &timeout_action_id {
            let known = process
                .steps
                .iter()
                .flat_map(|s| &s.actions)
                .any(|a| &a.id == escalation);
            if !known {
                return Err(EngineError::NotFound(format!(
                    "Escalation action not found in process: {}",
                    escalation.0
                )));
            }
        }

        let action = find_action_mut(&mut process, action_id)?;
        action.timeout_seconds = timeout_seconds;
        action.timeout_action_id = timeout_action_id;
        process.updated_at = self.clock.now();
        self.process_repo.save(&process).await?;

        tracing::info!(
            process_id = %process.id.0,
            action_id = %action_id.0,
            actor = %actor_user_id,
            "Timeout configured"
        );
        Ok(())
    }

    /// Attach a form field to a step. Fields are shared by key: when a
    /// definition with this key already exists it is reused instead of
    /// redefined, so the same field can appear on several steps and
    /// processes with its values flowing through.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_field(
        &self,
        process_id: &ProcessId,
        step_id: &StepId,
        key: &str,
        title: &str,
        entry_type: EntryType,
        is_required: bool,
        permission: FieldPermission,
        order_index: i32,
        actor_user_id: &str,
    ) -> Result<(FieldId, LinkId), EngineError> {
        if key.trim().is_empty() {
            return Err(EngineError::Validation(
                "Field key must not be empty".to_string(),
            ));
        }
        let process = self.load(process_id).await?;
        if process.step(step_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "Step not found: {}",
                step_id.0
            )));
        }

        let field = match self.field_repo.find_by_key(key).await? {
            Some(existing) => {
                if existing.entry_type != entry_type {
                    tracing::warn!(
                        field_key = %key,
                        existing = ?existing.entry_type,
                        requested = ?entry_type,
                        "Reusing field with a different entry type"
                    );
                }
                existing
            }
            None => {
                let field = FieldDefinition::new(key, title, entry_type, is_required);
                self.field_repo.save(&field).await?;
                field
            }
        };

        let existing_links = self.field_repo.links_for_step(step_id).await?;
        if existing_links.iter().any(|l| l.field_id == field.id) {
            return Err(EngineError::Validation(format!(
                "Field '{}' is already attached to this step",
                key
            )));
        }

        let mut link = StepFieldLink::new(step_id.clone(), field.id.clone());
        link.permission = permission;
        link.order_index = order_index;
        let link_id = link.id.clone();
        self.field_repo.save_link(&link).await?;

        tracing::info!(
            process_id = %process.id.0,
            step_id = %step_id.0,
            field_key = %key,
            actor = %actor_user_id,
            "Field attached to step"
        );
        Ok((field.id, link_id))
    }

    /// Load a full definition: the graph with each step's form resolved.
    /// Links for all steps are fetched in one pass and grouped in memory.
    pub async fn get_process_definition(
        &self,
        process_id: &ProcessId,
    ) -> Result<ProcessDefinitionView, EngineError> {
        let process = self.load(process_id).await?;

        let step_ids: Vec<StepId> = process.steps.iter().map(|s| s.id.clone()).collect();
        let links = self.field_repo.links_for_steps(&step_ids).await?;

        let field_ids: Vec<FieldId> = links.iter().map(|l| l.field_id.clone()).collect();
        let fields = self.field_repo.find_by_ids(&field_ids).await?;
        let fields_by_id: HashMap<&str, &FieldDefinition> =
            fields.iter().map(|f| (f.id.0.as_str(), f)).collect();

        let mut links_by_step: HashMap<&str, Vec<&StepFieldLink>> = HashMap::new();
        for link in &links {
            links_by_step
                .entry(link.step_id.0.as_str())
                .or_default()
                .push(link);
        }

        let mut steps: Vec<StepView> = process
            .steps
            .iter()
            .map(|step| {
                let mut bindings: Vec<FieldBinding> = links_by_step
                    .get(step.id.0.as_str())
                    .into_iter()
                    .flatten()
                    .filter_map(|link| {
                        fields_by_id.get(link.field_id.0.as_str()).map(|field| {
                            FieldBinding {
                                link: (*link).clone(),
                                field: (*field).clone(),
                            }
                        })
                    })
                    .collect();
                bindings.sort_by_key(|b| b.link.order_index);
                StepView {
                    step: step.clone(),
                    fields: bindings,
                }
            })
            .collect();
        steps.sort_by_key(|v| v.step.order_index);

        Ok(ProcessDefinitionView { process, steps })
    }

    async fn load(&self, process_id: &ProcessId) -> Result<Process, EngineError> {
        self.process_repo
            .find_by_id(process_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Process not found: {}", process_id.0)))
    }
}

fn find_action_mut<'a>(
    process: &'a mut Process,
    action_id: &ActionId,
) -> Result<&'a mut Action, EngineError> {
    process
        .steps
        .iter_mut()
        .flat_map(|s| s.actions.iter_mut())
        .find(|a| &a.id == action_id)
        .ok_or_else(|| EngineError::NotFound(format!("Action not found: {}", action_id.0)))
}
