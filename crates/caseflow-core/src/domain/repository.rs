//! Repository traits for the Caseflow engine
//!
//! The engine operates exclusively through these traits. External crates can
//! implement them to provide different persistence mechanisms; a relational
//! backend would map each multi-row method onto one database transaction.

use async_trait::async_trait;

use super::fields::{FieldDefinition, FieldId, StepFieldLink};
use super::history::HistoryRecord;
use super::process::{Process, ProcessId, StepId};
use super::request::{ProcessRequest, RequestId, RequestStatus, RequestValue};
use crate::EngineError;

/// Repository for process definitions
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Find a process by ID
    async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, EngineError>;

    /// Find the process that owns a step
    async fn find_by_step_id(&self, step_id: &StepId) -> Result<Option<Process>, EngineError>;

    /// Find the single active process for a code, if any
    async fn find_active_by_code(&self, code: &str) -> Result<Option<Process>, EngineError>;

    /// Highest version recorded for a code, across active and inactive
    /// generations
    async fn max_version_for_code(&self, code: &str) -> Result<Option<u32>, EngineError>;

    /// Insert or replace a process. Rejects a second active process for the
    /// same code.
    async fn save(&self, process: &Process) -> Result<(), EngineError>;

    /// List every stored process generation
    async fn list(&self) -> Result<Vec<Process>, EngineError>;

    /// Atomically commit a whole new process graph: the process, any
    /// upserted field definitions, its step/field links, and optionally the
    /// deactivation of a prior generation. Used by clone and import; either
    /// everything lands or nothing does.
    async fn save_graph(
        &self,
        process: &Process,
        fields: &[FieldDefinition],
        links: &[StepFieldLink],
        deactivate: Option<&ProcessId>,
    ) -> Result<(), EngineError>;
}

/// Repository for field definitions and their step links
#[async_trait]
pub trait FieldRepository: Send + Sync {
    /// Find a field by ID
    async fn find_by_id(&self, id: &FieldId) -> Result<Option<FieldDefinition>, EngineError>;

    /// Find several fields in one pass
    async fn find_by_ids(&self, ids: &[FieldId]) -> Result<Vec<FieldDefinition>, EngineError>;

    /// Find a field by its natural key
    async fn find_by_key(&self, key: &str) -> Result<Option<FieldDefinition>, EngineError>;

    /// Insert or replace a field definition. Keys are unique.
    async fn save(&self, field: &FieldDefinition) -> Result<(), EngineError>;

    /// Links attached to one step, unordered
    async fn links_for_step(&self, step_id: &StepId) -> Result<Vec<StepFieldLink>, EngineError>;

    /// Links attached to any of the given steps, fetched in one pass so
    /// callers can group in memory instead of issuing a query per step
    async fn links_for_steps(&self, step_ids: &[StepId])
        -> Result<Vec<StepFieldLink>, EngineError>;

    /// Attach a field to a step
    async fn save_link(&self, link: &StepFieldLink) -> Result<(), EngineError>;
}

/// Repository for running requests, their history and form values
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Find a request by ID
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ProcessRequest>, EngineError>;

    /// Atomically create a request together with its synthetic started
    /// history record and any initial form values. Enforces request-number
    /// uniqueness; callers may regenerate the number and retry on a
    /// violation.
    async fn create(
        &self,
        request: &ProcessRequest,
        started: &HistoryRecord,
        values: &[RequestValue],
    ) -> Result<(), EngineError>;

    /// Atomically commit one transition: the updated request, its history
    /// record and any form values written by the action.
    ///
    /// Compare-and-swap on the stored revision: when it no longer equals
    /// `expected_revision` a concurrent transition won, nothing is written,
    /// and `ConcurrencyConflict` is returned for the caller to retry.
    async fn commit_transition(
        &self,
        request: &ProcessRequest,
        expected_revision: u64,
        history: &HistoryRecord,
        values: &[RequestValue],
    ) -> Result<(), EngineError>;

    /// List requests by status
    async fn list_by_status(&self, status: RequestStatus)
        -> Result<Vec<ProcessRequest>, EngineError>;

    /// Full history for a request, in append order
    async fn history_for(&self, request_id: &RequestId)
        -> Result<Vec<HistoryRecord>, EngineError>;

    /// Stored form values for a request
    async fn values_for(&self, request_id: &RequestId) -> Result<Vec<RequestValue>, EngineError>;
}

/// Memory implementations for testing and POC setups
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct State {
        processes: HashMap<String, Process>,
        fields: HashMap<String, FieldDefinition>,
        links: Vec<StepFieldLink>,
        requests: HashMap<String, ProcessRequest>,
        request_numbers: HashSet<String>,
        history: HashMap<String, Vec<HistoryRecord>>,
        values: HashMap<String, Vec<RequestValue>>,
    }

    /// In-memory backend implementing all three repositories over a single
    /// lock, so the multi-row commit methods are genuinely all-or-nothing —
    /// the same guarantee a relational transaction gives the engine.
    #[derive(Clone)]
    pub struct MemoryWorkflowStore {
        inner: Arc<RwLock<State>>,
    }

    impl MemoryWorkflowStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self {
                inner: Arc::new(RwLock::new(State::default())),
            }
        }

        fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, EngineError> {
            self.inner
                .read()
                .map_err(|e| EngineError::StateStore(format!("Failed to acquire read lock: {}", e)))
        }

        fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, EngineError> {
            self.inner.write().map_err(|e| {
                EngineError::StateStore(format!("Failed to acquire write lock: {}", e))
            })
        }
    }

    impl Default for MemoryWorkflowStore {
        fn default() -> Self {
            Self::new()
        }
    }

    fn check_active_code_unique(
        state: &State,
        candidate: &Process,
        deactivate: Option<&ProcessId>,
    ) -> Result<(), EngineError> {
        if !candidate.is_active {
            return Ok(());
        }
        let clash = state.processes.values().any(|p| {
            p.is_active
                && p.code == candidate.code
                && p.id != candidate.id
                && Some(&p.id) != deactivate
        });
        if clash {
            return Err(EngineError::Validation(format!(
                "An active process with code '{}' already exists",
                candidate.code
            )));
        }
        Ok(())
    }

    #[async_trait]
    impl ProcessRepository for MemoryWorkflowStore {
        async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, EngineError> {
            Ok(self.read()?.processes.get(&id.0).cloned())
        }

        async fn find_by_step_id(
            &self,
            step_id: &StepId,
        ) -> Result<Option<Process>, EngineError> {
            let state = self.read()?;
            Ok(state
                .processes
                .values()
                .find(|p| p.steps.iter().any(|s| &s.id == step_id))
                .cloned())
        }

        async fn find_active_by_code(&self, code: &str) -> Result<Option<Process>, EngineError> {
            let state = self.read()?;
            Ok(state
                .processes
                .values()
                .find(|p| p.is_active && p.code == code)
                .cloned())
        }

        async fn max_version_for_code(&self, code: &str) -> Result<Option<u32>, EngineError> {
            let state = self.read()?;
            Ok(state
                .processes
                .values()
                .filter(|p| p.code == code)
                .map(|p| p.version)
                .max())
        }

        async fn save(&self, process: &Process) -> Result<(), EngineError> {
            let mut state = self.write()?;
            check_active_code_unique(&state, process, None)?;
            state.processes.insert(process.id.0.clone(), process.clone());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Process>, EngineError> {
            Ok(self.read()?.processes.values().cloned().collect())
        }

        async fn save_graph(
            &self,
            process: &Process,
            fields: &[FieldDefinition],
            links: &[StepFieldLink],
            deactivate: Option<&ProcessId>,
        ) -> Result<(), EngineError> {
            let mut state = self.write()?;

            // Validate everything before mutating anything
            check_active_code_unique(&state, process, deactivate)?;
            if let Some(old_id) = deactivate {
                if !state.processes.contains_key(&old_id.0) {
                    return Err(EngineError::NotFound(format!(
                        "Process to deactivate not found: {}",
                        old_id.0
                    )));
                }
            }

            for field in fields {
                state.fields.insert(field.id.0.clone(), field.clone());
            }
            state.processes.insert(process.id.0.clone(), process.clone());
            state.links.extend(links.iter().cloned());
            if let Some(old_id) = deactivate {
                if let Some(old) = state.processes.get_mut(&old_id.0) {
                    old.is_active = false;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FieldRepository for MemoryWorkflowStore {
        async fn find_by_id(&self, id: &FieldId) -> Result<Option<FieldDefinition>, EngineError> {
            Ok(self.read()?.fields.get(&id.0).cloned())
        }

        async fn find_by_ids(
            &self,
            ids: &[FieldId],
        ) -> Result<Vec<FieldDefinition>, EngineError> {
            let state = self.read()?;
            Ok(ids
                .iter()
                .filter_map(|id| state.fields.get(&id.0).cloned())
                .collect())
        }

        async fn find_by_key(&self, key: &str) -> Result<Option<FieldDefinition>, EngineError> {
            let state = self.read()?;
            Ok(state.fields.values().find(|f| f.key == key).cloned())
        }

        async fn save(&self, field: &FieldDefinition) -> Result<(), EngineError> {
            let mut state = self.write()?;
            let clash = state
                .fields
                .values()
                .any(|f| f.key == field.key && f.id != field.id);
            if clash {
                return Err(EngineError::Validation(format!(
                    "A field with key '{}' already exists",
                    field.key
                )));
            }
            state.fields.insert(field.id.0.clone(), field.clone());
            Ok(())
        }

        async fn links_for_step(
            &self,
            step_id: &StepId,
        ) -> Result<Vec<StepFieldLink>, EngineError> {
            let state = self.read()?;
            Ok(state
                .links
                .iter()
                .filter(|l| &l.step_id == step_id)
                .cloned()
                .collect())
        }

        async fn links_for_steps(
            &self,
            step_ids: &[StepId],
        ) -> Result<Vec<StepFieldLink>, EngineError> {
            let wanted: HashSet<&str> = step_ids.iter().map(|s| s.0.as_str()).collect();
            let state = self.read()?;
            Ok(state
                .links
                .iter()
                .filter(|l| wanted.contains(l.step_id.0.as_str()))
                .cloned()
                .collect())
        }

        async fn save_link(&self, link: &StepFieldLink) -> Result<(), EngineError> {
            let mut state = self.write()?;
            state.links.push(link.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl RequestRepository for MemoryWorkflowStore {
        async fn find_by_id(
            &self,
            id: &RequestId,
        ) -> Result<Option<ProcessRequest>, EngineError> {
            Ok(self.read()?.requests.get(&id.0).cloned())
        }

        async fn create(
            &self,
            request: &ProcessRequest,
            started: &HistoryRecord,
            values: &[RequestValue],
        ) -> Result<(), EngineError> {
            let mut state = self.write()?;
            if state.request_numbers.contains(&request.request_number) {
                return Err(EngineError::Validation(format!(
                    "Request number '{}' already exists",
                    request.request_number
                )));
            }
            state
                .request_numbers
                .insert(request.request_number.clone());
            state.requests.insert(request.id.0.clone(), request.clone());
            state
                .history
                .entry(request.id.0.clone())
                .or_default()
                .push(started.clone());
            if !values.is_empty() {
                state
                    .values
                    .entry(request.id.0.clone())
                    .or_default()
                    .extend(values.iter().cloned());
            }
            Ok(())
        }

        async fn commit_transition(
            &self,
            request: &ProcessRequest,
            expected_revision: u64,
            history: &HistoryRecord,
            values: &[RequestValue],
        ) -> Result<(), EngineError> {
            let mut state = self.write()?;

            let stored = state.requests.get(&request.id.0).ok_or_else(|| {
                EngineError::NotFound(format!("Request not found: {}", request.id.0))
            })?;
            if stored.revision != expected_revision {
                return Err(EngineError::ConcurrencyConflict(format!(
                    "Request {} was modified concurrently (expected revision {}, found {})",
                    request.request_number, expected_revision, stored.revision
                )));
            }

            state.requests.insert(request.id.0.clone(), request.clone());
            state
                .history
                .entry(request.id.0.clone())
                .or_default()
                .push(history.clone());

            let stored_values = state.values.entry(request.id.0.clone()).or_default();
            for value in values {
                match stored_values
                    .iter_mut()
                    .find(|v| v.field_id == value.field_id)
                {
                    Some(existing) => *existing = value.clone(),
                    None => stored_values.push(value.clone()),
                }
            }
            Ok(())
        }

        async fn list_by_status(
            &self,
            status: RequestStatus,
        ) -> Result<Vec<ProcessRequest>, EngineError> {
            let state = self.read()?;
            Ok(state
                .requests
                .values()
                .filter(|r| r.status == status)
                .cloned()
                .collect())
        }

        async fn history_for(
            &self,
            request_id: &RequestId,
        ) -> Result<Vec<HistoryRecord>, EngineError> {
            let state = self.read()?;
            Ok(state.history.get(&request_id.0).cloned().unwrap_or_default())
        }

        async fn values_for(
            &self,
            request_id: &RequestId,
        ) -> Result<Vec<RequestValue>, EngineError> {
            let state = self.read()?;
            Ok(state.values.get(&request_id.0).cloned().unwrap_or_default())
        }
    }

}
