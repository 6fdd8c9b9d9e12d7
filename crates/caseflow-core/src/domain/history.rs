use crate::domain::process::{ActionId, StepId};
use crate::domain::request::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit record for a request transition.
///
/// Exactly one record per executed action, plus one synthetic "started"
/// record with `from_step_id = None` written at creation. Records are never
/// mutated or deleted; dashboards and document generation derive from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique identifier
    pub id: String,

    /// Owning request
    pub request_id: RequestId,

    /// Step the request left; `None` for the started record
    pub from_step_id: Option<StepId>,

    /// Step the request arrived at
    pub to_step_id: Option<StepId>,

    /// The action that caused the transition; `None` for the started record
    pub action_id: Option<ActionId>,

    /// Who performed the action
    pub actor_user_id: String,

    /// When the transition happened
    pub action_time: DateTime<Utc>,

    /// Free-form comment supplied with the action
    pub comments: Option<String>,
}

impl HistoryRecord {
    /// Record an executed action
    pub fn transition(
        request_id: RequestId,
        from_step_id: StepId,
        to_step_id: StepId,
        action_id: ActionId,
        actor_user_id: &str,
        action_time: DateTime<Utc>,
        comments: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            from_step_id: Some(from_step_id),
            to_step_id: Some(to_step_id),
            action_id: Some(action_id),
            actor_user_id: actor_user_id.to_string(),
            action_time,
            comments,
        }
    }

    /// The synthetic record written when a request is started
    pub fn started(
        request_id: RequestId,
        start_step_id: StepId,
        actor_user_id: &str,
        action_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            from_step_id: None,
            to_step_id: Some(start_step_id),
            action_id: None,
            actor_user_id: actor_user_id.to_string(),
            action_time,
            comments: Some("process started".to_string()),
        }
    }
}
