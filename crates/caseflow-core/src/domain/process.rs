use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: Process ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Value object: Action ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

/// Value object: Action condition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionId(pub String);

impl ProcessId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl StepId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ActionId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ConditionId {
    /// Mint a fresh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ConditionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of a step within the process graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    /// Entry point; exactly one per process
    Start,
    /// Work performed by a human
    UserTask,
    /// Work performed by an integration
    SystemTask,
    /// Document signing step
    Signing,
    /// Plain intermediate step
    Normal,
    /// Approval decision step
    Approval,
    /// Terminal step; reaching it completes a request
    End,
}

/// Kind of an action (outgoing transition choice)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    /// Approve and move on
    Approve,
    /// Reject the submission
    Reject,
    /// Send back for changes
    RequestChange,
    /// Cancel the request
    Cancel,
    /// Hand the task to someone else
    Delegate,
    /// Submit the current form
    Submit,
    /// Withdraw the request
    Withdraw,
}

/// Who a step's task is routed to.
///
/// Steps without an assignment are visible to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAssignment {
    /// A specific user
    User(String),
    /// Any member of a role
    Role(String),
    /// The user whose id is stored in the request's form value for this key
    DynamicField(String),
}

/// One branch of a conditional transition: if `rule_expression` evaluates
/// true against the submitted form values, route to `target_step_id`
/// instead of the action's default target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCondition {
    /// Unique identifier
    pub id: ConditionId,

    /// Owning action
    pub action_id: ActionId,

    /// Where to route when this branch matches
    pub target_step_id: Option<StepId>,

    /// Boolean expression handed to the injected rule evaluator
    pub rule_expression: String,
}

/// A directed edge/transition choice available from a step.
///
/// Names are unique within a step; lookup by name is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier
    pub id: ActionId,

    /// Source step
    pub step_id: StepId,

    /// Display name; the transition is addressed by it
    pub name: String,

    /// Kind of action
    pub action_type: ActionType,

    /// Default target step. `None` means "stay" or terminal without an
    /// explicit target.
    pub target_step_id: Option<StepId>,

    /// Whether executing this action requires a comment
    pub is_comment_required: bool,

    /// Timeout in seconds before the sweep flags the request as overdue
    pub timeout_seconds: Option<u64>,

    /// Fallback action to auto-fire on timeout (extension point; the sweep
    /// only reports it)
    pub timeout_action_id: Option<ActionId>,

    /// Condition to use when none of `conditions` matched
    pub default_condition_id: Option<ConditionId>,

    /// Conditional branches, evaluated in persisted order; first true wins
    pub conditions: Vec<ActionCondition>,
}

impl Action {
    /// Find a condition owned by this action by its id
    pub fn condition(&self, id: &ConditionId) -> Option<&ActionCondition> {
        self.conditions.iter().find(|c| &c.id == id)
    }
}

/// A node in the process graph; a state a request can be "at".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier
    pub id: StepId,

    /// Owning process
    pub process_id: ProcessId,

    /// Display name; import/export re-links connections by it
    pub name: String,

    /// Kind of step
    pub step_type: StepType,

    /// Advisory UI ordering only. Execution order is graph-driven via
    /// actions, never by this index.
    pub order_index: i32,

    /// Expected duration, for reporting
    pub duration_minutes: Option<u32>,

    /// Task routing for the user task list
    pub assignment: Option<StepAssignment>,

    /// Outgoing transition choices
    pub actions: Vec<Action>,
}

impl Step {
    /// Look up an action on this step by case-insensitive name
    pub fn action_by_name(&self, name: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Look up an action on this step by id
    pub fn action_by_id(&self, id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.id == id)
    }
}

/// Aggregate: a versioned, named workflow definition (graph of steps and
/// actions). The process strictly owns its steps, steps own their actions,
/// actions own their conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    /// Unique identifier
    pub id: ProcessId,

    /// Human-readable name
    pub name: String,

    /// Unique, human-readable identifier shared by all generations.
    /// At most one process per code may be active at any time.
    pub code: String,

    /// Monotonic generation counter, starting at 1
    pub version: u32,

    /// Whether this generation accepts new requests
    pub is_active: bool,

    /// Generation this process was cloned from
    pub parent_process_id: Option<ProcessId>,

    /// The steps of the graph, in authoring order
    pub steps: Vec<Step>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Process {
    /// Create generation 1 of a new process code
    pub fn new(name: &str, code: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ProcessId::new(),
            name: name.to_string(),
            code: code.to_string(),
            version: 1,
            is_active: true,
            parent_process_id: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Find a step by id
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Mutable lookup of a step by id
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// The unique Start step. Fails loudly when it is absent or ambiguous.
    pub fn start_step(&self) -> Result<&Step, EngineError> {
        let mut starts = self.steps.iter().filter(|s| s.step_type == StepType::Start);
        match (starts.next(), starts.next()) {
            (Some(step), None) => Ok(step),
            (None, _) => Err(EngineError::NotFound(format!(
                "Start step not found in process {}",
                self.code
            ))),
            (Some(_), Some(_)) => Err(EngineError::Validation(format!(
                "Process {} has more than one Start step",
                self.code
            ))),
        }
    }

    /// Find the step that owns an action
    pub fn step_of_action(&self, action_id: &ActionId) -> Option<&Step> {
        self.steps.iter().find(|s| s.action_by_id(action_id).is_some())
    }

    /// Validate the definition's referential integrity.
    ///
    /// Used before export and by callers that want a well-formed graph;
    /// the authoring operations themselves stay permissive.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::Validation(
                "Process must have at least one step".to_string(),
            ));
        }

        self.start_step()?;

        let mut step_ids = std::collections::HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(&step.id) {
                return Err(EngineError::Validation(format!(
                    "Duplicate step ID: {}",
                    step.id.0
                )));
            }
        }

        for step in &self.steps {
            let mut names = std::collections::HashSet::new();
            for action in &step.actions {
                if !names.insert(action.name.to_ascii_lowercase()) {
                    return Err(EngineError::Validation(format!(
                        "Duplicate action name '{}' on step {}",
                        action.name, step.name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(process_id: &ProcessId, name: &str, step_type: StepType) -> Step {
        Step {
            id: StepId::new(),
            process_id: process_id.clone(),
            name: name.to_string(),
            step_type,
            order_index: 0,
            duration_minutes: None,
            assignment: None,
            actions: Vec::new(),
        }
    }

    fn action(step_id: &StepId, name: &str, target: Option<StepId>) -> Action {
        Action {
            id: ActionId::new(),
            step_id: step_id.clone(),
            name: name.to_string(),
            action_type: ActionType::Submit,
            target_step_id: target,
            is_comment_required: false,
            timeout_seconds: None,
            timeout_action_id: None,
            default_condition_id: None,
            conditions: Vec::new(),
        }
    }

    #[test]
    fn test_start_step_found() {
        let mut process = Process::new("Leave", "LEAVE", Utc::now());
        let apply = step(&process.id, "Apply", StepType::Start);
        let apply_id = apply.id.clone();
        process.steps.push(apply);
        process.steps.push(step(&process.id, "Done", StepType::End));

        assert_eq!(process.start_step().unwrap().id, apply_id);
    }

    #[test]
    fn test_start_step_missing() {
        let mut process = Process::new("Leave", "LEAVE", Utc::now());
        process.steps.push(step(&process.id, "Done", StepType::End));

        let result = process.start_step();
        match result {
            Err(EngineError::NotFound(msg)) => assert!(msg.contains("Start step not found")),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_start_step_ambiguous() {
        let mut process = Process::new("Leave", "LEAVE", Utc::now());
        process.steps.push(step(&process.id, "A", StepType::Start));
        process.steps.push(step(&process.id, "B", StepType::Start));

        let result = process.start_step();
        match result {
            Err(EngineError::Validation(msg)) => assert!(msg.contains("more than one Start")),
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_action_lookup_case_insensitive() {
        let process_id = ProcessId::new();
        let mut apply = step(&process_id, "Apply", StepType::Start);
        apply.actions.push(action(&apply.id, "Approve", None));

        assert!(apply.action_by_name("approve").is_some());
        assert!(apply.action_by_name("APPROVE").is_some());
        assert!(apply.action_by_name("reject").is_none());
    }

    #[test]
    fn test_validate_empty_process() {
        let process = Process::new("Leave", "LEAVE", Utc::now());
        let result = process.validate();
        match result {
            Err(EngineError::Validation(msg)) => {
                assert!(msg.contains("at least one step"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_duplicate_action_names() {
        let mut process = Process::new("Leave", "LEAVE", Utc::now());
        let mut apply = step(&process.id, "Apply", StepType::Start);
        apply.actions.push(action(&apply.id, "Approve", None));
        apply.actions.push(action(&apply.id, "approve", None));
        process.steps.push(apply);

        let result = process.validate();
        match result {
            Err(EngineError::Validation(msg)) => {
                assert!(msg.contains("Duplicate action name"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_step_of_action() {
        let mut process = Process::new("Leave", "LEAVE", Utc::now());
        let mut apply = step(&process.id, "Apply", StepType::Start);
        let approve = action(&apply.id, "Approve", None);
        let approve_id = approve.id.clone();
        apply.actions.push(approve);
        let apply_id = apply.id.clone();
        process.steps.push(apply);
        process.steps.push(step(&process.id, "Done", StepType::End));

        assert_eq!(process.step_of_action(&approve_id).unwrap().id, apply_id);
        assert!(process.step_of_action(&ActionId::new()).is_none());
    }
}
