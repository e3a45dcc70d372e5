// Teardown workflow - deletes an instance once someone approves it

//! # Teardown Workflow
//!
//! ```text
//! awaiting_approval -> approved -> deleting -> done
//! awaiting_approval -> timed_out
//! ```
//!
//! The workflow waits for the `approveTeardown` signal, racing it against a
//! timer of `approval_timeout`. If the timer wins the run fails with
//! `ApprovalTimeout` and nothing is deleted. If the signal wins the instance
//! is deleted.
//!
//! An approval sent before the workflow starts waiting is queued in the
//! execution's signal channel and wins the race as soon as the wait begins.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::activities::ResourceActivities;
use super::context::{Signal, WorkflowContext};
use super::retry::ActivityProxy;
use super::workflow::Workflow;
use crate::models::{RetryPolicy, TeardownArgs, TeardownStep, WorkflowKind};
use crate::{ProvisionerError, Result};

pub struct TeardownWorkflow {
    activities: Arc<dyn ResourceActivities>,
    policy: RetryPolicy,
    approval_timeout: Duration,
}

impl TeardownWorkflow {
    pub fn new(
        activities: Arc<dyn ResourceActivities>,
        policy: RetryPolicy,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            activities,
            policy,
            approval_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Workflow for TeardownWorkflow {
    type Input = TeardownArgs;
    type Output = String;

    const KIND: WorkflowKind = WorkflowKind::Teardown;

    async fn run(&self, ctx: &WorkflowContext, input: TeardownArgs) -> Result<String> {
        let instance_id = input.validate()?;

        ctx.enter_step(TeardownStep::AwaitingApproval.as_str()).await;
        info!(
            workflow_id = ctx.workflow_id(),
            instance_id,
            timeout_secs = self.approval_timeout.as_secs(),
            "waiting for teardown approval"
        );

        let approved = ctx
            .wait_for_signal(Signal::ApproveTeardown, self.approval_timeout)
            .await?;

        if !approved {
            ctx.enter_step(TeardownStep::TimedOut.as_str()).await;
            warn!(workflow_id = ctx.workflow_id(), instance_id, "teardown not approved in time");
            return Err(ProvisionerError::ApprovalTimeout {
                waited: self.approval_timeout,
            });
        }
        ctx.enter_step(TeardownStep::Approved.as_str()).await;

        let proxy = ActivityProxy::new(
            self.activities.clone(),
            self.policy.clone(),
            ctx.cancellation().clone(),
        );
        ctx.enter_step(TeardownStep::Deleting.as_str()).await;
        proxy
            .delete_instance(instance_id)
            .await
            .map_err(|e| e.in_step(TeardownStep::Deleting.as_str()))?;

        ctx.enter_step(TeardownStep::Done.as_str()).await;
        info!(workflow_id = ctx.workflow_id(), instance_id, "instance deleted");
        Ok(format!("Environment teardown successful: {}", instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::activities::names;
    use crate::engine::context::WorkflowControl;
    use crate::engine::storage::InMemoryExecutionStorage;
    use crate::engine::testing::{fast_policy, ScriptedActivities};
    use crate::ErrorKind;

    const HOUR: Duration = Duration::from_secs(3600);

    fn setup() -> (Arc<ScriptedActivities>, TeardownWorkflow, WorkflowContext, WorkflowControl) {
        let activities = Arc::new(ScriptedActivities::new());
        let workflow = TeardownWorkflow::new(activities.clone(), fast_policy(), HOUR);
        let (ctx, control) = WorkflowContext::new(
            "teardown-i-1",
            WorkflowKind::Teardown,
            Arc::new(InMemoryExecutionStorage::new()),
        );
        (activities, workflow, ctx, control)
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_deletes_once() {
        let (activities, workflow, ctx, control) = setup();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(120)).await;
            control.signal(Signal::ApproveTeardown);
        });

        let message = workflow.run(&ctx, TeardownArgs::new("i-1")).await.unwrap();

        assert_eq!(message, "Environment teardown successful: i-1");
        assert_eq!(activities.count(names::DELETE_INSTANCE), 1);
        assert_eq!(activities.calls_to(names::DELETE_INSTANCE)[0].args, vec!["i-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_deletes_nothing() {
        let (activities, workflow, ctx, _control) = setup();

        let error = workflow.run(&ctx, TeardownArgs::new("i-1")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ApprovalTimeout);
        assert!(activities.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_sent_immediately_is_not_lost() {
        let (activities, workflow, ctx, control) = setup();
        control.signal(Signal::ApproveTeardown);

        workflow.run(&ctx, TeardownArgs::new("i-1")).await.unwrap();

        assert_eq!(activities.count(names::DELETE_INSTANCE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let (activities, workflow, ctx, control) = setup();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            control.cancel();
        });

        let error = workflow.run(&ctx, TeardownArgs::new("i-1")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(activities.count(names::DELETE_INSTANCE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_instance_id_is_rejected() {
        let (activities, workflow, ctx, control) = setup();
        control.signal(Signal::ApproveTeardown);

        let error = workflow.run(&ctx, TeardownArgs::new("")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PreconditionFailed);
        assert!(activities.calls().is_empty());
    }
}
