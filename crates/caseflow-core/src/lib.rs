//!
//! Caseflow Core - configurable business process engine
//!
//! This crate defines the domain models, repository interfaces and
//! application services for designing, versioning and executing
//! user-defined approval workflows. Process graphs, their form fields
//! and running requests all live behind repository traits, so the same
//! engine runs against the in-memory backend used in tests or a real
//! database.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - core application logic
pub mod application;

/// Error types
pub mod error;

/// Text template substitution
pub mod template;

// Re-export key types
pub use error::EngineError;

pub use domain::fields::{
    EntryType, FieldDefinition, FieldId, FieldPermission, LinkId, StepFieldLink,
};
pub use domain::history::HistoryRecord;
pub use domain::process::{
    Action, ActionCondition, ActionId, ActionType, ConditionId, Process, ProcessId, Step,
    StepAssignment, StepId, StepType,
};
pub use domain::request::{
    FieldValue, ProcessRequest, RequestId, RequestStatus, RequestValue,
};
pub use domain::repository::{FieldRepository, ProcessRepository, RequestRepository};

pub use application::definition_service::{
    DefinitionService, FieldBinding, ProcessDefinitionView, StepView,
};
pub use application::execution_service::{ActionRef, ExecutionService, UserTask};
pub use application::timeout_sweep::{OverdueAction, TimeoutSweep};
pub use application::transfer::{ProcessExport, TransferService};
pub use application::versioning_service::{CloneOptions, VersioningService};

#[cfg(feature = "testing")]
pub use domain::repository::memory::MemoryWorkflowStore;

/// Form values submitted with an action, keyed by field key
pub type FormValues = HashMap<String, serde_json::Value>;

/// Evaluates an action condition's rule expression against the request's
/// form values.
///
/// Evaluation is tolerant: a malformed or unevaluable expression counts as
/// false, so one bad rule disables its branch instead of blocking the
/// whole transition.
pub trait RuleEvaluator: Send + Sync {
    /// Return whether the expression holds for the given values
    fn evaluate(&self, expression: &str, values: &FormValues) -> bool;
}

impl<F> RuleEvaluator for F
where
    F: Fn(&str, &FormValues) -> bool + Send + Sync,
{
    fn evaluate(&self, expression: &str, values: &FormValues) -> bool {
        self(expression, values)
    }
}

/// Source of the current time, injectable so timeouts are testable
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mints human-readable request numbers. Implementations need not
/// guarantee uniqueness; the request repository enforces it on create.
pub trait RequestNumberGenerator: Send + Sync {
    /// Produce a candidate request number
    fn next(&self) -> String;
}

/// Default generator: "PR-" followed by eight uppercase hex characters
/// from a fresh UUID
#[derive(Debug, Clone, Copy, Default)]
pub struct HexRequestNumbers;

impl RequestNumberGenerator for HexRequestNumbers {
    fn next(&self) -> String {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        format!("PR-{}", raw[..8].to_uppercase())
    }
}

/// Hook notified after a request transition has been committed.
///
/// Dispatch is fire-and-forget: handler failures are logged and never
/// affect the already-committed transition.
#[async_trait]
pub trait StateChangedHandler: Send + Sync + Debug {
    /// Handle a committed state change
    async fn handle(&self, event: domain::events::StateChanged) -> Result<(), EngineError>;
}

/// Handler that ignores all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStateChangedHandler;

#[async_trait]
impl StateChangedHandler for NullStateChangedHandler {
    async fn handle(&self, _event: domain::events::StateChanged) -> Result<(), EngineError> {
        Ok(())
    }
}
