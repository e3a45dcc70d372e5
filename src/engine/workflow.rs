// Workflow trait - the seam between the client and workflow definitions

//! # Workflow Definitions
//!
//! Each workflow (provisioning, instance attachment, teardown) implements
//! [`Workflow`]. The client only needs to know the input and output types and
//! the kind to record; everything else happens inside `run`.
//!
//! Workflow code must only suspend through the [`WorkflowContext`] it is given
//! and must only reach the outside world through its activity proxy. Given the
//! same activity results and signals, `run` makes the same calls in the same
//! order.
//!
//! ## Rust Learning Notes:
//!
//! ### Associated Types and Constants
//! `type Input`, `type Output` and `const KIND` are fixed per implementation.
//! The client's generic `execute<W: Workflow>` uses them to serialize the
//! input into the execution record and to type the return value.

use serde::Serialize;

use super::context::WorkflowContext;
use crate::models::WorkflowKind;
use crate::Result;

#[async_trait::async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: Serialize + Send + Sync + 'static;
    type Output: Serialize + Send + Sync + 'static;

    const KIND: WorkflowKind;

    async fn run(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}
