// Provisioner Engine
// This contains the workflows and the runtime pieces they execute on

//! # Provisioner Engine Module
//!
//! This module contains the workflows and everything they need to run. The
//! engine is the layer between the domain models and the external world.
//!
//! ## Architecture Overview
//!
//! - **Domain Models**: plain data (in `models/`)
//! - **Engine Layer**: workflows, activities, retries, signals (this module)
//! - **Server Layer**: HTTP endpoints over the client (in `server/`)
//!
//! ## Engine Components
//!
//! ### Activities (`activities` module)
//! - The `ResourceActivities` trait every cloud backend implements
//! - `ActivityError` with the kind retry decisions are based on
//!
//! ### Retries (`retry` module)
//! - `RetryPolicy::execute` applies backoff, attempt limits and per-call timeouts
//! - `ActivityProxy` wraps a backend so workflow code never retries by hand
//!
//! ### Workflow Context (`context` module)
//! - Interruptible timers, buffered signals and cancellation per execution
//!
//! ### Workflows (`provisioning`, `attachment`, `teardown` modules)
//! - The three state machines, each implementing the `Workflow` trait
//!
//! ### Client (`client` module)
//! - Entry points, the running-execution registry and status queries
//!
//! ### Storage (`storage` module)
//! - Execution records, with an in-memory implementation
//!
//! ### In-Memory Cloud (`cloud` module)
//! - A reference-checking backend used by the server binary and the tests
//!
//! ## Rust Learning Notes:
//!
//! ### Module Organization Pattern
//! 1. Create a directory with the module name (`engine/`)
//! 2. Add a `mod.rs` file as the module root
//! 3. Declare submodules in `mod.rs`
//! 4. Re-export important types for a clean API

/// Activity interface and failure type
pub mod activities;

/// Instance-attachment workflow
pub mod attachment;

/// Workflow entry points and running-execution registry
pub mod client;

/// In-memory cloud backend
pub mod cloud;

/// Timers, signals and cancellation for one execution
pub mod context;

/// Provisioning workflow
pub mod provisioning;

/// Retry execution and the activity proxy
pub mod retry;

/// Execution record storage
pub mod storage;

/// Teardown workflow
pub mod teardown;

/// The trait every workflow implements
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use activities::{ActivityError, ResourceActivities};
pub use attachment::InstanceAttachmentWorkflow;
pub use client::{EngineSettings, TeardownHandle, WorkflowClient};
pub use cloud::{CloudResource, InMemoryCloud};
pub use context::{Signal, WorkflowContext, WorkflowControl};
pub use provisioning::ProvisioningWorkflow;
pub use retry::ActivityProxy;
pub use storage::{ExecutionStorage, InMemoryExecutionStorage};
pub use teardown::TeardownWorkflow;
pub use workflow::Workflow;
