// Execution records - what a workflow execution did and how it ended

//! # Execution Models
//!
//! A [`WorkflowExecution`] is the record the engine keeps for every started
//! workflow: which kind it is, which step it reached, the history of steps it
//! entered and, once finished, its result or error.
//!
//! Records are written by the engine and read by status queries. They are not
//! used to resume or replay executions.
//!
//! ## Rust Learning Notes:
//!
//! ### Option for Late-Bound Fields
//! `result`, `error` and `completed_at` only get values once the execution
//! finishes, so they are `Option<T>` and start as `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, ProvisionerError};

/// Which workflow an execution runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Provisioning,
    InstanceAttachment,
    Teardown,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Provisioning => "provisioning",
            WorkflowKind::InstanceAttachment => "instance-attachment",
            WorkflowKind::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One entry in an execution's step history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub step: String,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    /// Caller-visible workflow id, unique among running executions
    pub id: String,
    pub kind: WorkflowKind,
    pub status: ExecutionStatus,
    /// Arguments the execution was started with
    pub input: serde_json::Value,
    pub current_step: Option<String>,
    pub history: Vec<StepEvent>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Step named by the error, when the failure happened inside a step
    pub failed_step: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(id: impl Into<String>, kind: WorkflowKind, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            status: ExecutionStatus::Running,
            input,
            current_step: None,
            history: Vec::new(),
            result: None,
            error: None,
            error_kind: None,
            failed_step: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Record that the execution entered `step`
    pub fn enter_step(&mut self, step: impl Into<String>) {
        let step = step.into();
        self.current_step = Some(step.clone());
        self.history.push(StepEvent {
            step,
            entered_at: Utc::now(),
        });
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = ExecutionStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &ProvisionerError) {
        let kind = error.kind();
        self.status = if kind == ErrorKind::Cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        self.error = Some(error.to_string());
        self.error_kind = Some(kind);
        self.failed_step = error.step().map(str::to_string);
        self.completed_at = Some(Utc::now());
    }

    /// Step names in the order they were entered
    pub fn steps(&self) -> Vec<&str> {
        self.history.iter().map(|e| e.step.as_str()).collect()
    }
}
