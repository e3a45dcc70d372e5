// Infra Provisioner - Rust Edition
// Durable workflows that build, extend and tear down a cloud environment

//! # Infra Provisioner Library
//!
//! This is the library root for the provisioner. It wires together the domain
//! models, the workflow engine and the HTTP surface, and defines the error
//! type every workflow reports through.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`EnvironmentArgs`] / [`EnvironmentOutput`]: input and result of provisioning
//! - [`InstanceArgs`] / [`TeardownArgs`]: inputs of the instance workflows
//! - [`SubnetCatalog`]: the ordered, injectable four-entry subnet layout
//! - [`RetryPolicy`]: backoff, attempt and timeout settings for activity calls
//!
//! ### Workflow Engine
//!
//! #### [`WorkflowClient`] - Entry Points
//!
//! Starts workflow executions, delivers signals and tracks running executions:
//!
//! - **Provisioning**: VPC, subnets, gateway, routing, security group, load balancer
//! - **Instance Attachment**: create an instance, wait until running, register it
//! - **Teardown**: wait for an `approveTeardown` signal or time out, then delete
//!
//! #### [`ResourceActivities`] - Remote Calls
//!
//! The trait every cloud backend implements. Workflows never call it directly;
//! they go through [`ActivityProxy`], which applies the workflow's
//! [`RetryPolicy`] to every invocation.
//!
//! ### HTTP Server
//! Exposes the entry points and the approval signal to other processes.
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the internal
//! module structure. Instead of `use infra_provisioner::engine::client::WorkflowClient`,
//! users can write `use infra_provisioner::WorkflowClient`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod engine;
pub mod models;
pub mod server;

// Re-export the most commonly used types at the crate root
pub use config::ProvisionerConfig;
pub use engine::{
    activities::{ActivityError, ResourceActivities},
    client::{EngineSettings, TeardownHandle, WorkflowClient},
    cloud::InMemoryCloud,
    context::{Signal, WorkflowContext},
    retry::ActivityProxy,
    storage::{ExecutionStorage, InMemoryExecutionStorage},
};
pub use models::{
    EnvironmentArgs, EnvironmentOutput, ExecutionStatus, InstanceArgs, InstanceState, RetryPolicy,
    SubnetCatalog, SubnetSpec, TeardownArgs, WorkflowExecution, WorkflowKind,
};
pub use server::HttpServerBuilder;

// Core error types
use thiserror::Error;

/// Classification of a failure
///
/// Retry policies decide whether to try again purely on this value, and the
/// HTTP layer uses it to pick a status code. Remote failures carry it inside
/// [`ActivityError`]; workflow-level failures derive it via
/// [`ProvisionerError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input supplied by the caller. Never retried.
    PreconditionFailed,
    /// The remote API call failed; usually transient.
    RemoteCallFailed,
    /// The remote API rejected the request as malformed or referencing
    /// something that does not exist. Retrying cannot help.
    InvalidRequest,
    /// The remote call reported success but returned no usable identifier.
    EmptyResult,
    /// A single attempt exceeded the per-call timeout.
    Timeout,
    /// Teardown was not approved before its timer fired.
    ApprovalTimeout,
    /// An instance never reached the running state before the poll deadline.
    PollExhausted,
    /// The execution was cancelled from outside.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::RemoteCallFailed => "remote_call_failed",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ApprovalTimeout => "approval_timeout",
            ErrorKind::PollExhausted => "poll_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for provisioner operations
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements the `std::error::Error` trait
/// - `#[error("...")]` provides human-readable error messages
/// - `#[source]` exposes the wrapped error through `Error::source()`
/// - `#[from]` enables automatic conversion from other error types
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// The caller supplied input the workflow cannot start from
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// An activity kept failing until its retry policy gave up, or failed
    /// with a kind the policy marks as non-retryable
    #[error("Activity {activity} failed after {attempts} attempt(s): {source}")]
    ActivityFailed {
        activity: String,
        attempts: u32,
        #[source]
        source: ActivityError,
    },

    /// A remote call succeeded but handed back an empty identifier
    #[error("{step} returned an empty identifier")]
    EmptyResult { step: String },

    /// No approval signal arrived before the teardown timer fired
    #[error("Teardown not approved within {}s", .waited.as_secs())]
    ApprovalTimeout { waited: Duration },

    /// The instance never reported `running` before the poll deadline
    #[error("Instance {instance_id} not running after {polls} poll(s) within {}s", .deadline.as_secs())]
    PollExhausted {
        instance_id: String,
        polls: u32,
        deadline: Duration,
    },

    /// The execution was cancelled while suspended
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A workflow step failed; names the step and keeps the cause
    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<ProvisionerError>,
    },

    /// No running execution with this workflow id
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Another execution with the same workflow id is still running
    #[error("Workflow already running: {0}")]
    WorkflowAlreadyRunning(String),

    /// Settings that cannot drive a workflow (bad catalog, bad policy)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Execution record storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors (panicked or aborted workflow tasks)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionerError {
    /// Wrap this error with the name of the workflow step it came from
    pub fn in_step(self, step: impl Into<String>) -> Self {
        ProvisionerError::StepFailed {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Name of the workflow step that failed, if the error carries one
    pub fn step(&self) -> Option<&str> {
        match self {
            ProvisionerError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Classify this error, looking through step wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionerError::PreconditionFailed(_)
            | ProvisionerError::WorkflowNotFound(_)
            | ProvisionerError::WorkflowAlreadyRunning(_)
            | ProvisionerError::InvalidConfiguration(_) => ErrorKind::PreconditionFailed,
            ProvisionerError::ActivityFailed { source, .. } => source.kind,
            ProvisionerError::EmptyResult { .. } => ErrorKind::EmptyResult,
            ProvisionerError::ApprovalTimeout { .. } => ErrorKind::ApprovalTimeout,
            ProvisionerError::PollExhausted { .. } => ErrorKind::PollExhausted,
            ProvisionerError::Cancelled(_) => ErrorKind::Cancelled,
            ProvisionerError::StepFailed { source, .. } => source.kind(),
            ProvisionerError::Storage(_)
            | ProvisionerError::Serialization(_)
            | ProvisionerError::Internal(_) => ErrorKind::RemoteCallFailed,
        }
    }
}

impl From<::config::ConfigError> for ProvisionerError {
    fn from(err: ::config::ConfigError) -> Self {
        ProvisionerError::InvalidConfiguration(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, ProvisionerError>;
