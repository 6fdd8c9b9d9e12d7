//! End-to-end tests driving requests through a leave-approval process.

use caseflow_core::{
    ActionRef, ActionType, Clock, DefinitionService, EngineError, EntryType, ExecutionService,
    FieldPermission, FormValues, HexRequestNumbers, MemoryWorkflowStore, NullStateChangedHandler,
    Process, ProcessRequest, RequestStatus, RuleEvaluator, StepAssignment, StepId, StepType,
    SystemClock, TimeoutSweep,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Copy)]
struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Understands expressions of the form "key > n"; anything else is false.
fn evaluator() -> Arc<dyn RuleEvaluator> {
    Arc::new(|expr: &str, values: &FormValues| -> bool {
        let Some((key, rhs)) = expr.split_once('>') else {
            return false;
        };
        let Ok(threshold) = rhs.trim().parse::<i64>() else {
            return false;
        };
        values
            .get(key.trim())
            .and_then(|v| v.as_i64())
            .map_or(false, |v| v > threshold)
    })
}

fn definitions(store: &MemoryWorkflowStore, clock: Arc<dyn Clock>) -> DefinitionService {
    DefinitionService::new(Arc::new(store.clone()), Arc::new(store.clone()), clock)
}

fn execution(store: &MemoryWorkflowStore, clock: Arc<dyn Clock>) -> ExecutionService {
    ExecutionService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        evaluator(),
        Arc::new(HexRequestNumbers),
        clock,
        Arc::new(NullStateChangedHandler),
    )
}

struct LeaveProcess {
    process: Process,
    apply: StepId,
    review: StepId,
    director: StepId,
    done: StepId,
}

/// Apply (Start) -> Review (manager) -> [Director for long leaves] -> Done.
/// The "days" field is written at Apply and read at Review.
async fn build_leave_process(service: &DefinitionService) -> LeaveProcess {
    let process = service
        .create_process("Leave Request", "LEAVE", "admin")
        .await
        .unwrap();
    let apply = service
        .add_step(&process.id, "Apply", StepType::Start, 0, None, None, "admin")
        .await
        .unwrap();
    let review = service
        .add_step(
            &process.id,
            "Review",
            StepType::Approval,
            1,
            Some(60),
            Some(StepAssignment::Role("manager".to_string())),
            "admin",
        )
        .await
        .unwrap();
    let director = service
        .add_step(
            &process.id,
            "Director Review",
            StepType::Approval,
            2,
            None,
            Some(StepAssignment::Role("director".to_string())),
            "admin",
        )
        .await
        .unwrap();
    let done = service
        .add_step(&process.id, "Done", StepType::End, 3, None, None, "admin")
        .await
        .unwrap();

    service
        .add_action(
            &process.id,
            &apply,
            "Submit",
            ActionType::Submit,
            Some(review.clone()),
            false,
            "admin",
        )
        .await
        .unwrap();

    let approve = service
        .add_action(
            &process.id,
            &review,
            "Approve",
            ActionType::Approve,
            None,
            false,
            "admin",
        )
        .await
        .unwrap();
    service
        .add_condition(
            &process.id,
            &approve,
            Some(director.clone()),
            "days > 10",
            "admin",
        )
        .await
        .unwrap();
    let fallback = service
        .add_condition(&process.id, &approve, Some(done.clone()), "never", "admin")
        .await
        .unwrap();
    service
        .set_default_condition(&process.id, &approve, &fallback, "admin")
        .await
        .unwrap();

    service
        .add_action(
            &process.id,
            &review,
            "Reject",
            ActionType::Reject,
            Some(done.clone()),
            true,
            "admin",
        )
        .await
        .unwrap();
    service
        .add_action(
            &process.id,
            &director,
            "Approve",
            ActionType::Approve,
            Some(done.clone()),
            false,
            "admin",
        )
        .await
        .unwrap();

    service
        .add_field(
            &process.id,
            &apply,
            "days",
            "Days",
            EntryType::Number,
            true,
            FieldPermission::Write,
            0,
            "admin",
        )
        .await
        .unwrap();
    service
        .add_field(
            &process.id,
            &review,
            "days",
            "Days",
            EntryType::Number,
            true,
            FieldPermission::Read,
            0,
            "admin",
        )
        .await
        .unwrap();

    let process = service.get_process_definition(&process.id).await.unwrap().process;
    LeaveProcess {
        process,
        apply,
        review,
        director,
        done,
    }
}

fn days(n: i64) -> FormValues {
    let mut values = FormValues::new();
    values.insert("days".to_string(), json!(n));
    values
}

async fn start(execution: &ExecutionService, leave: &LeaveProcess, n: i64) -> ProcessRequest {
    execution
        .start_process(&leave.process.code, "alice", &days(n))
        .await
        .unwrap()
}

#[tokio::test]
async fn start_anchors_request_at_the_start_step() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    assert_eq!(request.current_step_id, leave.apply);
    assert_eq!(request.status, RequestStatus::Active);
    assert!(request.request_number.starts_with("PR-"));
    assert_eq!(request.revision, 1);

    use caseflow_core::RequestRepository;
    let history = store.history_for(&request.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].from_step_id.is_none());
    assert_eq!(history[0].to_step_id, Some(leave.apply.clone()));

    let values = store.values_for(&request.id).await.unwrap();
    assert_eq!(values.len(), 1);
}

#[tokio::test]
async fn start_rejects_missing_required_values() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let result = execution
        .start_process("LEAVE", "alice", &FormValues::new())
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn short_leave_completes_via_default_condition() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.current_step_id, leave.review);
    assert_eq!(request.revision, 2);

    // "days > 10" is false for 3, the "never" fallback targets Done
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "bob",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.current_step_id, leave.done);
    assert_eq!(request.status, RequestStatus::Completed);
    assert!(request.due_date.is_none());

    use caseflow_core::RequestRepository;
    let history = store.history_for(&request.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].actor_user_id, "bob");
}

#[tokio::test]
async fn long_leave_routes_to_director_first() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 14).await;
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "bob",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.current_step_id, leave.director);
    assert_eq!(request.status, RequestStatus::Active);

    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "carol",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Completed);
}

#[tokio::test]
async fn first_true_condition_wins_in_stored_order() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = definitions(&store, clock.clone());

    let process = service.create_process("Routing", "ROUTE", "admin").await.unwrap();
    let begin = service
        .add_step(&process.id, "Begin", StepType::Start, 0, None, None, "admin")
        .await
        .unwrap();
    let first = service
        .add_step(&process.id, "First", StepType::Normal, 1, None, None, "admin")
        .await
        .unwrap();
    let second = service
        .add_step(&process.id, "Second", StepType::Normal, 2, None, None, "admin")
        .await
        .unwrap();
    let third = service
        .add_step(&process.id, "Third", StepType::Normal, 3, None, None, "admin")
        .await
        .unwrap();
    let go = service
        .add_action(&process.id, &begin, "Go", ActionType::Submit, None, false, "admin")
        .await
        .unwrap();
    // false, true, true in stored order
    service
        .add_condition(&process.id, &go, Some(first.clone()), "n > 100", "admin")
        .await
        .unwrap();
    service
        .add_condition(&process.id, &go, Some(second.clone()), "n > 5", "admin")
        .await
        .unwrap();
    service
        .add_condition(&process.id, &go, Some(third.clone()), "n > 1", "admin")
        .await
        .unwrap();
    service
        .add_field(
            &process.id,
            &begin,
            "n",
            "N",
            EntryType::Number,
            true,
            FieldPermission::Write,
            0,
            "admin",
        )
        .await
        .unwrap();

    let execution = execution(&store, clock);
    let mut values = FormValues::new();
    values.insert("n".to_string(), json!(8));
    let request = execution
        .start_process("ROUTE", "alice", &values)
        .await
        .unwrap();
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Go".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.current_step_id, second);
    assert_ne!(request.current_step_id, third);
    let _ = first;
}

#[tokio::test]
async fn reject_requires_a_comment() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();

    let result = execution
        .execute(
            &request.id,
            &ActionRef::Name("Reject".to_string()),
            "bob",
            Some("   "),
            &FormValues::new(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Reject".to_string()),
            "bob",
            Some("overlapping with the release"),
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Completed);

    use caseflow_core::RequestRepository;
    let history = store.history_for(&request.id).await.unwrap();
    assert_eq!(
        history.last().unwrap().comments.as_deref(),
        Some("overlapping with the release")
    );
}

#[tokio::test]
async fn completed_requests_refuse_further_actions() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "bob",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Completed);

    let result = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "bob",
            None,
            &FormValues::new(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn malformed_rules_fall_through_to_the_default() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = definitions(&store, clock.clone());

    let process = service.create_process("Tolerant", "TOL", "admin").await.unwrap();
    let begin = service
        .add_step(&process.id, "Begin", StepType::Start, 0, None, None, "admin")
        .await
        .unwrap();
    let odd = service
        .add_step(&process.id, "Odd", StepType::Normal, 1, None, None, "admin")
        .await
        .unwrap();
    let safe = service
        .add_step(&process.id, "Safe", StepType::Normal, 2, None, None, "admin")
        .await
        .unwrap();
    let go = service
        .add_action(&process.id, &begin, "Go", ActionType::Submit, None, false, "admin")
        .await
        .unwrap();
    service
        .add_condition(&process.id, &go, Some(odd.clone()), "!!not a rule!!", "admin")
        .await
        .unwrap();
    let fallback = service
        .add_condition(&process.id, &go, Some(safe.clone()), "also broken", "admin")
        .await
        .unwrap();
    service
        .set_default_condition(&process.id, &go, &fallback, "admin")
        .await
        .unwrap();

    let execution = execution(&store, clock);
    let request = execution
        .start_process("TOL", "alice", &FormValues::new())
        .await
        .unwrap();
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Go".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();
    assert_eq!(request.current_step_id, safe);
    let _ = odd;
}

#[tokio::test]
async fn unknown_action_and_foreign_fields_are_rejected() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    let result = execution
        .execute(
            &request.id,
            &ActionRef::Name("Escalate".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));

    let mut values = FormValues::new();
    values.insert("salary".to_string(), json!(9000));
    let result = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &values,
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn read_only_fields_cannot_be_overwritten() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let request = start(&execution, &leave, 3).await;
    let request = execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();

    // "days" is read-only on the Review step
    let result = execution
        .execute(
            &request.id,
            &ActionRef::Name("Approve".to_string()),
            "bob",
            None,
            &days(30),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn user_tasks_respect_step_assignments() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let leave = build_leave_process(&definitions(&store, clock.clone())).await;
    let execution = execution(&store, clock);

    let waiting = start(&execution, &leave, 3).await;
    let submitted = start(&execution, &leave, 5).await;
    execution
        .execute(
            &submitted.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();

    // Apply has no assignment, so the waiting request shows up for anyone;
    // Review is assigned to the manager role.
    let manager_tasks = execution
        .get_user_tasks("bob", &["manager".to_string()])
        .await
        .unwrap();
    assert_eq!(manager_tasks.len(), 2);
    assert!(manager_tasks
        .iter()
        .any(|t| t.request.id == submitted.id && t.step_name == "Review"));

    let plain_tasks = execution.get_user_tasks("dave", &[]).await.unwrap();
    assert_eq!(plain_tasks.len(), 1);
    assert_eq!(plain_tasks[0].request.id, waiting.id);
    assert!(!plain_tasks[0].actions.is_empty());
}

#[tokio::test]
async fn dynamic_field_assignment_matches_the_stored_value() {
    let store = MemoryWorkflowStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = definitions(&store, clock.clone());

    let process = service.create_process("Pick", "PICK", "admin").await.unwrap();
    let begin = service
        .add_step(&process.id, "Begin", StepType::Start, 0, None, None, "admin")
        .await
        .unwrap();
    let chosen = service
        .add_step(
            &process.id,
            "Chosen",
            StepType::UserTask,
            1,
            None,
            Some(StepAssignment::DynamicField("approver".to_string())),
            "admin",
        )
        .await
        .unwrap();
    service
        .add_action(
            &process.id,
            &begin,
            "Send",
            ActionType::Submit,
            Some(chosen.clone()),
            false,
            "admin",
        )
        .await
        .unwrap();
    service
        .add_field(
            &process.id,
            &begin,
            "approver",
            "Approver",
            EntryType::UserSelect,
            true,
            FieldPermission::Write,
            0,
            "admin",
        )
        .await
        .unwrap();

    let execution = execution(&store, clock);
    let mut values = FormValues::new();
    values.insert("approver".to_string(), json!("carol"));
    let request = execution
        .start_process("PICK", "alice", &values)
        .await
        .unwrap();
    execution
        .execute(
            &request.id,
            &ActionRef::Name("Send".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();

    let carol = execution.get_user_tasks("carol", &[]).await.unwrap();
    assert_eq!(carol.len(), 1);
    assert_eq!(carol[0].step_name, "Chosen");

    let dave = execution.get_user_tasks("dave", &[]).await.unwrap();
    assert!(dave.is_empty());
}

#[tokio::test]
async fn sweep_reports_requests_past_their_action_timeout() {
    let store = MemoryWorkflowStore::new();
    let t0 = Utc::now();
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(t0));
    let service = definitions(&store, clock.clone());
    let leave = build_leave_process(&service).await;

    let approve = leave
        .process
        .step(&leave.review)
        .unwrap()
        .action_by_name("Approve")
        .unwrap()
        .id
        .clone();
    service
        .configure_timeout(&leave.process.id, &approve, Some(3600), None, "admin")
        .await
        .unwrap();

    let execution = execution(&store, clock);
    let request = start(&execution, &leave, 3).await;
    execution
        .execute(
            &request.id,
            &ActionRef::Name("Submit".to_string()),
            "alice",
            None,
            &FormValues::new(),
        )
        .await
        .unwrap();

    // Ten minutes in, nothing is overdue yet
    let early = TimeoutSweep::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedClock(t0 + Duration::minutes(10))),
    );
    assert!(early.run().await.unwrap().is_empty());

    // Two hours in, the hour-long timeout on Approve has elapsed
    let late = TimeoutSweep::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedClock(t0 + Duration::hours(2))),
    );
    let overdue = late.run().await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].request_id, request.id);
    assert_eq!(overdue[0].step_id, leave.review);
    assert_eq!(overdue[0].action_id, approve);
}
