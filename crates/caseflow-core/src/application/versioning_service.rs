use crate::{
    domain::fields::StepFieldLink,
    domain::process::{
        Action, ActionCondition, ActionId, ConditionId, Process, ProcessId, Step, StepId,
    },
    domain::repository::{FieldRepository, ProcessRepository},
    Clock, EngineError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Knobs for cloning a process
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneOptions {
    /// Also rewrite action-to-action references (timeout escalations) onto
    /// the cloned actions. Off by default: such references keep pointing
    /// at whatever they pointed at, matching how step targets outside the
    /// cloned graph are preserved.
    pub remap_action_refs: bool,
}

/// Service for producing new generations of a process
pub struct VersioningService {
    process_repo: Arc<dyn ProcessRepository>,
    field_repo: Arc<dyn FieldRepository>,
    clock: Arc<dyn Clock>,
}

impl VersioningService {
    /// Create a new versioning service
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

    /// Clone a process into the next generation of its code.
    ///
    /// Every step, action and condition gets a fresh identity. A step map
    /// is built up front so intra-process targets are rewritten onto the
    /// clone; targets pointing outside the source graph are preserved
    /// unchanged. Field definitions are shared, their step links are
    /// copied. The clone becomes the active generation and the previously
    /// active one is deactivated in the same commit. Running requests keep
    /// the generation they started on.
    pub async fn clone_process(
        &self,
        source_id: &ProcessId,
        actor_user_id: &str,
        options: CloneOptions,
    ) -> Result<Process, EngineError> {
        let source = self
            .process_repo
            .find_by_id(source_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("Process not found: {}", source_id.0))
            })?;

        let next_version = self
            .process_repo
            .max_version_for_code(&source.code)
            .await?
            .unwrap_or(0)
            + 1;
        let previously_active = self.process_repo.find_active_by_code(&source.code).await?;

        let now = self.clock.now();
        let new_process_id = ProcessId::new();

        // Fresh identities for every step and action first, so references
        // can be rewritten in a second pass regardless of graph order.
        let step_map: HashMap<&str, StepId> = source
            .steps
            .iter()
            .map(|s| (s.id.0.as_str(), StepId::new()))
            .collect();
        let action_map: HashMap<&str, ActionId> = source
            .steps
            .iter()
            .flat_map(|s| &s.actions)
            .map(|a| (a.id.0.as_str(), ActionId::new()))
            .collect();

        let map_step = |id: &Option<StepId>| -> Option<StepId> {
            id.as_ref()
                .map(|old| step_map.get(old.0.as_str()).cloned().unwrap_or_else(|| old.clone()))
        };
        let map_action = |id: &Option<ActionId>| -> Option<ActionId> {
            id.as_ref().map(|old| {
                if options.remap_action_refs {
                    action_map
                        .get(old.0.as_str())
                        .cloned()
                        .unwrap_or_else(|| old.clone())
                } else {
                    old.clone()
                }
            })
        };

        let steps: Vec<Step> = source
            .steps
            .iter()
            .map(|step| {
                let new_step_id = step_map[step.id.0.as_str()].clone();
                let actions = step
                    .actions
                    .iter()
                    .map(|action| {
                        let new_action_id = action_map[action.id.0.as_str()].clone();
                        let mut condition_map: HashMap<&str, ConditionId> = HashMap::new();
                        let conditions: Vec<ActionCondition> = action
                            .conditions
                            .iter()
                            .map(|condition| {
                                let new_id = ConditionId::new();
                                condition_map.insert(condition.id.0.as_str(), new_id.clone());
                                ActionCondition {
                                    id: new_id,
                                    action_id: new_action_id.clone(),
                                    target_step_id: map_step(&condition.target_step_id),
                                    rule_expression: condition.rule_expression.clone(),
                                }
                            })
                            .collect();
                        // The default pointer names one of this action's own
                        // conditions, so it always follows the fresh IDs.
                        let default_condition_id = action
                            .default_condition_id
                            .as_ref()
                            .and_then(|old| condition_map.get(old.0.as_str()).cloned());
                        Action {
                            id: new_action_id,
                            step_id: new_step_id.clone(),
                            name: action.name.clone(),
                            action_type: action.action_type,
                            target_step_id: map_step(&action.target_step_id),
                            is_comment_required: action.is_comment_required,
                            timeout_seconds: action.timeout_seconds,
                            timeout_action_id: map_action(&action.timeout_action_id),
                            default_condition_id,
                            conditions,
                        }
                    })
                    .collect();
                Step {
                    id: new_step_id,
                    process_id: new_process_id.clone(),
                    name: step.name.clone(),
                    step_type: step.step_type,
                    order_index: step.order_index,
                    duration_minutes: step.duration_minutes,
                    assignment: step.assignment.clone(),
                    actions,
                }
            })
            .collect();

        let mut links = Vec::new();
        for step in &source.steps {
            for link in self.field_repo.links_for_step(&step.id).await? {
                let mut copied = StepFieldLink::new(
                    step_map[step.id.0.as_str()].clone(),
                    link.field_id.clone(),
                );
                copied.permission = link.permission;
                copied.order_index = link.order_index;
                copied.visibility_rule = link.visibility_rule.clone();
                links.push(copied);
            }
        }

        let clone = Process {
            id: new_process_id,
            name: source.name.clone(),
            code: source.code.clone(),
            version: next_version,
            is_active: true,
            parent_process_id: Some(source.id.clone()),
            steps,
            created_at: now,
            updated_at: now,
        };
        clone.validate()?;

        self.process_repo
            .save_graph(
                &clone,
                &[],
                &links,
                previously_active.as_ref().map(|p| &p.id),
            )
            .await?;

        tracing::info!(
            process_id = %clone.id.0,
            source_id = %source.id.0,
            code = %clone.code,
            version = clone.version,
            actor = %actor_user_id,
            "Process cloned"
        );
        Ok(clone)
    }
}
