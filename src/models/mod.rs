// Core domain models for the provisioner
// These are plain data structures shared by the engine and the HTTP layer

//! # Domain Models Module
//!
//! This module contains the data model of the provisioner. Nothing in here
//! talks to a cloud API or a runtime; workflows in `engine` consume and
//! produce these values.
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports for Clean APIs
//! The `pub use` statements at the bottom create a clean, flat API.
//! Users can import `use infra_provisioner::models::RetryPolicy` instead of
//! `use infra_provisioner::models::retry::RetryPolicy`.

// Workflow inputs/outputs and the subnet catalog
pub mod environment;

// Execution records kept for status queries
pub mod execution;

// Backoff, attempt and timeout settings for activity calls
pub mod retry;

// Named steps of each workflow state machine
pub mod step;

pub use environment::{
    EnvironmentArgs, EnvironmentOutput, InstanceArgs, InstanceState, SubnetCatalog, SubnetSpec,
    TeardownArgs, PUBLIC_SUBNET_COUNT, SUBNET_COUNT,
};
pub use execution::{ExecutionStatus, StepEvent, WorkflowExecution, WorkflowKind};
pub use retry::RetryPolicy;
pub use step::{AttachmentStep, ProvisioningStep, TeardownStep};
