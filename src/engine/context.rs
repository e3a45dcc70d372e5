// Workflow context - timers, signals and cancellation for one execution

//! # Workflow Context
//!
//! A [`WorkflowContext`] is handed to a workflow when its execution starts. It
//! is the only way workflow code suspends:
//!
//! - [`WorkflowContext::sleep`]: a timer that can be interrupted by cancellation
//! - [`WorkflowContext::wait_for_signal`]: race an external signal against a timer
//! - [`WorkflowContext::enter_step`]: record progress in the execution record
//!
//! The other half of the pair is [`WorkflowControl`], which the client keeps
//! while the execution runs and uses to deliver signals and cancel it.
//!
//! ## Signal Delivery
//!
//! Signals travel over an unbounded channel. A signal sent before the
//! workflow starts waiting sits in the channel and is seen on the first wait,
//! so an early approval is never lost. Signals of a kind the workflow is not
//! waiting for are dropped.
//!
//! ## Rust Learning Notes:
//!
//! ### tokio::select!
//! `select!` polls several futures and runs the branch of whichever finishes
//! first, dropping the others. With `biased;` branches are polled top to
//! bottom, so cancellation is always checked before a signal and a signal
//! before the timer.
//!
//! ### Pinning a Timer
//! `sleep_until` returns a future that must stay in one place while it is
//! polled repeatedly in a loop. `tokio::pin!` pins it on the stack so the same
//! timer keeps running across loop iterations instead of restarting.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::storage::ExecutionStorage;
use crate::models::WorkflowKind;
use crate::{ProvisionerError, Result};

/// External signals a running execution can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Signal {
    /// Approves a pending teardown
    ApproveTeardown,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::ApproveTeardown => "approveTeardown",
        }
    }

    pub fn from_name(name: &str) -> Option<Signal> {
        match name {
            "approveTeardown" | "approve-teardown" => Some(Signal::ApproveTeardown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle the engine keeps for a running execution
#[derive(Debug, Clone)]
pub struct WorkflowControl {
    signals: mpsc::UnboundedSender<Signal>,
    cancel: CancellationToken,
    kind: WorkflowKind,
}

impl WorkflowControl {
    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    /// Queue a signal for the execution
    ///
    /// Returns `false` if the execution has already dropped its context.
    pub fn signal(&self, signal: Signal) -> bool {
        self.signals.send(signal).is_ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Execution-scoped services available to workflow code
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    kind: WorkflowKind,
    cancel: CancellationToken,
    signals: Arc<Mutex<mpsc::UnboundedReceiver<Signal>>>,
    storage: Arc<dyn ExecutionStorage>,
}

impl WorkflowContext {
    /// Create the context for a new execution and the control handle for it
    pub fn new(
        workflow_id: impl Into<String>,
        kind: WorkflowKind,
        storage: Arc<dyn ExecutionStorage>,
    ) -> (WorkflowContext, WorkflowControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let context = WorkflowContext {
            workflow_id: workflow_id.into(),
            kind,
            cancel: cancel.clone(),
            signals: Arc::new(Mutex::new(rx)),
            storage,
        };
        let control = WorkflowControl {
            signals: tx,
            cancel,
            kind,
        };
        (context, control)
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record that the execution entered `step`
    ///
    /// A failure to write the record is logged and does not fail the workflow.
    pub async fn enter_step(&self, step: &str) {
        info!(workflow_id = %self.workflow_id, kind = %self.kind, step, "entering step");
        if let Err(e) = self.storage.record_step(&self.workflow_id, step).await {
            warn!(workflow_id = %self.workflow_id, step, error = %e, "failed to record step");
        }
    }

    /// Durable timer: sleep for `duration` unless the execution is cancelled
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProvisionerError::Cancelled(format!(
                "workflow {} cancelled while sleeping",
                self.workflow_id
            ))),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Wait until `expected` arrives or `timeout` elapses
    ///
    /// Returns `Ok(true)` when the signal won the race and `Ok(false)` when the
    /// timer fired first. Exactly one of the two outcomes is observed.
    pub async fn wait_for_signal(&self, expected: Signal, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let mut signals = self.signals.lock().await;
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ProvisionerError::Cancelled(format!(
                        "workflow {} cancelled while waiting for {}",
                        self.workflow_id, expected
                    )));
                }
                received = signals.recv(), if open => match received {
                    Some(signal) if signal == expected => {
                        info!(workflow_id = %self.workflow_id, signal = %signal, "signal received");
                        return Ok(true);
                    }
                    Some(other) => {
                        debug!(workflow_id = %self.workflow_id, signal = %other, "ignoring signal");
                    }
                    None => open = false,
                },
                _ = &mut timer => {
                    info!(workflow_id = %self.workflow_id, signal = %expected, ?timeout, "timer fired before signal");
                    return Ok(false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryExecutionStorage;
    use crate::models::WorkflowExecution;
    use crate::ErrorKind;

    fn context(id: &str) -> (WorkflowContext, WorkflowControl) {
        WorkflowContext::new(id, WorkflowKind::Teardown, Arc::new(InMemoryExecutionStorage::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_before_wait_is_kept() {
        let (ctx, control) = context("teardown-i-1");
        assert!(control.signal(Signal::ApproveTeardown));

        let approved = ctx
            .wait_for_signal(Signal::ApproveTeardown, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_wins_without_signal() {
        let (ctx, _control) = context("teardown-i-1");
        let started = Instant::now();

        let approved = ctx
            .wait_for_signal(Signal::ApproveTeardown, Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(!approved);
        assert!(started.elapsed() >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_still_waits_for_timer() {
        let (ctx, control) = context("teardown-i-1");
        drop(control);

        let approved = ctx
            .wait_for_signal(Signal::ApproveTeardown, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (ctx, control) = context("attach-1");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            control.cancel();
        });

        let error = ctx.sleep(Duration::from_secs(600)).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_enter_step_writes_history() {
        let storage = Arc::new(InMemoryExecutionStorage::new());
        storage
            .create_execution(WorkflowExecution::new(
                "teardown-i-9",
                WorkflowKind::Teardown,
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let (ctx, _control) = WorkflowContext::new("teardown-i-9", WorkflowKind::Teardown, storage.clone());
        ctx.enter_step("awaiting_approval").await;

        let record = storage.get_execution("teardown-i-9").await.unwrap().unwrap();
        assert_eq!(record.steps(), vec!["awaiting_approval"]);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::from_name("approveTeardown"), Some(Signal::ApproveTeardown));
        assert_eq!(Signal::from_name("approve-teardown"), Some(Signal::ApproveTeardown));
        assert_eq!(Signal::from_name("reject"), None);
        assert_eq!(
            serde_json::to_value(Signal::ApproveTeardown).unwrap(),
            "approveTeardown"
        );
    }
}
