use crate::domain::process::{ProcessId, StepId};
use crate::domain::request::{RequestId, RequestStatus};
use chrono::{DateTime, Utc};

/// Emitted after a request's state has been durably committed: on start and
/// after every executed action.
///
/// Dispatch is fire-and-forget and happens strictly after the commit, so a
/// slow or failing subscriber can never undo or block a transition.
#[derive(Debug, Clone)]
pub struct StateChanged {
    /// The request whose state changed
    pub request_id: RequestId,

    /// The process generation the request runs against
    pub process_id: ProcessId,

    /// The step the request is now at
    pub step_id: StepId,

    /// The request's status after the change
    pub status: RequestStatus,

    /// When the change was committed
    pub occurred_at: DateTime<Utc>,
}
