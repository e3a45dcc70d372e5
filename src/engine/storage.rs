// Storage abstraction for the workflow engine
// This defines the interface for persisting execution records

//! # Execution Storage
//!
//! Every workflow execution the engine starts gets a [`WorkflowExecution`]
//! record. The engine writes it when the execution starts, appends to its
//! history whenever the workflow enters a step and writes the final result or
//! error when the execution ends. Status queries read it back.
//!
//! Records are bookkeeping only. A restarted process does not resume the
//! executions it finds here.
//!
//! ## Storage Architecture
//!
//! The storage layer follows the **Repository Pattern**:
//! - **ExecutionStorage trait**: the interface the engine depends on
//! - **InMemoryExecutionStorage**: default implementation for development and tests
//!
//! ## Rust Learning Notes:
//!
//! ### Async Traits
//! Rust trait objects can't hold `async fn` directly. The `async-trait` crate
//! rewrites each method to return a boxed future so the engine can hold an
//! `Arc<dyn ExecutionStorage>`.
//!
//! ### Result<Option<T>>
//! `get_execution` returns `Result<Option<T>>`: the lookup itself can fail
//! (`Err`), and if it succeeds the record may or may not exist.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::{WorkflowExecution, WorkflowKind};
use crate::{ProvisionerError, Result};

/// Storage trait for execution records
#[async_trait::async_trait]
pub trait ExecutionStorage: Send + Sync {
    /// Store a new record, replacing any finished record with the same id
    async fn create_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution>;

    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>>;

    /// Replace an existing record
    ///
    /// ## Errors
    /// - `Storage` if no record with that id exists
    async fn update_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution>;

    /// Append `step` to the history of execution `id`
    async fn record_step(&self, id: &str, step: &str) -> Result<()>;

    /// List records, optionally only those of one workflow kind
    ///
    /// Newest first.
    async fn list_executions(&self, kind: Option<WorkflowKind>) -> Result<Vec<WorkflowExecution>>;
}

/// In-memory storage implementation for development and testing
///
/// ## Limitations
///
/// - **Not persistent**: records are lost when the process restarts
/// - **Not distributed**: other processes can't see these records
///
/// ## Rust Learning Notes:
///
/// ### Async RwLock
/// `tokio::sync::RwLock` is used instead of the std lock because it never
/// poisons, so there is no `unwrap()` on lock acquisition. Guards are still
/// released automatically when dropped (RAII).
#[derive(Default)]
pub struct InMemoryExecutionStorage {
    /// Key: workflow id
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ExecutionStorage for InMemoryExecutionStorage {
    async fn create_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id.clone(), execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(id).cloned())
    }

    async fn update_execution(&self, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(execution)
            }
            None => Err(ProvisionerError::Storage(format!(
                "no execution record for {}",
                execution.id
            ))),
        }
    }

    async fn record_step(&self, id: &str, step: &str) -> Result<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| ProvisionerError::Storage(format!("no execution record for {}", id)))?;
        execution.enter_step(step);
        Ok(())
    }

    async fn list_executions(&self, kind: Option<WorkflowKind>) -> Result<Vec<WorkflowExecution>> {
        let executions = self.executions.read().await;

        let mut filtered: Vec<WorkflowExecution> = executions
            .values()
            .filter(|execution| kind.map_or(true, |k| execution.kind == k))
            .cloned()
            .collect();

        filtered.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(filtered)
    }
}
