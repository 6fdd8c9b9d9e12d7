use crate::{
    domain::process::{ActionId, Process, ProcessId, StepId},
    domain::repository::{ProcessRepository, RequestRepository},
    domain::request::{RequestId, RequestStatus},
    Clock, EngineError,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One overdue action found by a sweep
#[derive(Debug, Clone)]
pub struct OverdueAction {
    /// The lingering request
    pub request_id: RequestId,
    /// Its human-facing number
    pub request_number: String,
    /// The process the request runs against
    pub process_id: ProcessId,
    /// The step the request is stuck on
    pub step_id: StepId,
    /// The action whose timeout elapsed
    pub action_id: ActionId,
    /// Escalation action configured on the timed-out action, if any
    pub timeout_action_id: Option<ActionId>,
    /// When the timeout elapsed
    pub deadline: DateTime<Utc>,
}

/// Scans active requests for actions whose timeout has elapsed.
///
/// The sweep only reports; firing the configured escalation action is left
/// to the caller, who knows which actor to attribute the transition to.
/// Scheduling is external too, callers run the sweep on whatever cadence
/// suits them.
pub struct TimeoutSweep {
    process_repo: Arc<dyn ProcessRepository>,
    request_repo: Arc<dyn RequestRepository>,
    clock: Arc<dyn Clock>,
}

impl TimeoutSweep {
    /// Create a new sweep
    pub fn new(
        process_repo: Arc<dyn ProcessRepository>,
        request_repo: Arc<dyn RequestRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            process_repo,
            request_repo,
            clock,
        }
    }

    /// Run one sweep over all active requests. The deadline for an action
    /// is the request's last update plus the action's timeout.
    pub async fn run(&self) -> Result<Vec<OverdueAction>, EngineError> {
        let now = self.clock.now();
        let requests = self
            .request_repo
            .list_by_status(RequestStatus::Active)
            .await?;

        let mut processes: HashMap<String, Process> = HashMap::new();
        let mut overdue = Vec::new();
        for request in &requests {
            let process = match processes.get(&request.process_id.0) {
                Some(p) => p.clone(),
                None => {
                    let Some(p) = self.process_repo.find_by_id(&request.process_id).await? else {
                        continue;
                    };
                    processes.insert(request.process_id.0.clone(), p.clone());
                    p
                }
            };
            let Some(step) = process.step(&request.current_step_id) else {
                continue;
            };
            for action in &step.actions {
                let Some(seconds) = action.timeout_seconds.filter(|s| *s > 0) else {
                    continue;
                };
                let deadline = request.updated_at + Duration::seconds(seconds as i64);
                if now <= deadline {
                    continue;
                }
                tracing::warn!(
                    request_id = %request.id.0,
                    request_number = %request.request_number,
                    step_id = %step.id.0,
                    action = %action.name,
                    deadline = %deadline,
                    "Request overdue on step"
                );
                overdue.push(OverdueAction {
                    request_id: request.id.clone(),
                    request_number: request.request_number.clone(),
                    process_id: process.id.clone(),
                    step_id: step.id.clone(),
                    action_id: action.id.clone(),
                    timeout_action_id: action.timeout_action_id.clone(),
                    deadline,
                });
            }
        }

        tracing::info!(
            scanned = requests.len(),
            overdue = overdue.len(),
            "Timeout sweep finished"
        );
        Ok(overdue)
    }
}
