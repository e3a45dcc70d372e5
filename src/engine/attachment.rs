// Instance-attachment workflow - adds a compute instance behind the load balancer

//! # Instance-Attachment Workflow
//!
//! ```text
//! create_instance -> poll_until_running -> register_instance -> done
//! ```
//!
//! After creating the instance the workflow sleeps `poll_interval`, asks for
//! the instance state and repeats until it reports `running`. The wait is
//! bounded: once `poll_deadline` has elapsed without a `running` report the
//! workflow fails with `PollExhausted`. Each state query is an ordinary
//! activity call, so it is retried under the workflow's policy like any other.
//!
//! A failure after the instance exists does not terminate it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::activities::ResourceActivities;
use super::context::WorkflowContext;
use super::retry::ActivityProxy;
use super::workflow::Workflow;
use crate::models::{AttachmentStep, InstanceArgs, RetryPolicy, WorkflowKind};
use crate::{ProvisionerError, Result};

pub struct InstanceAttachmentWorkflow {
    activities: Arc<dyn ResourceActivities>,
    policy: RetryPolicy,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl InstanceAttachmentWorkflow {
    pub fn new(
        activities: Arc<dyn ResourceActivities>,
        policy: RetryPolicy,
        poll_interval: Duration,
        poll_deadline: Duration,
    ) -> Self {
        Self {
            activities,
            policy,
            poll_interval,
            poll_deadline,
        }
    }

    async fn wait_until_running(
        &self,
        ctx: &WorkflowContext,
        proxy: &ActivityProxy,
        instance_id: &str,
    ) -> Result<u32> {
        let started = Instant::now();
        let mut polls = 0;

        loop {
            ctx.sleep(self.poll_interval).await?;
            let state = proxy.get_instance_state(instance_id).await?;
            polls += 1;

            if state.is_running() {
                return Ok(polls);
            }
            debug!(workflow_id = ctx.workflow_id(), instance_id, %state, polls, "instance not running yet");

            if started.elapsed() >= self.poll_deadline {
                return Err(ProvisionerError::PollExhausted {
                    instance_id: instance_id.to_string(),
                    polls,
                    deadline: self.poll_deadline,
                });
            }
        }
    }
}

#[async_trait::async_trait]
impl Workflow for InstanceAttachmentWorkflow {
    type Input = InstanceArgs;
    type Output = String;

    const KIND: WorkflowKind = WorkflowKind::InstanceAttachment;

    async fn run(&self, ctx: &WorkflowContext, input: InstanceArgs) -> Result<String> {
        input.validate()?;
        let proxy = ActivityProxy::new(
            self.activities.clone(),
            self.policy.clone(),
            ctx.cancellation().clone(),
        );

        ctx.enter_step(AttachmentStep::CreateInstance.as_str()).await;
        let instance_id = proxy
            .create_instance(&input.security_group_id, &input.subnet_id)
            .await
            .and_then(|id| {
                if id.trim().is_empty() {
                    Err(ProvisionerError::EmptyResult {
                        step: AttachmentStep::CreateInstance.as_str().to_string(),
                    })
                } else {
                    Ok(id)
                }
            })
            .map_err(|e| e.in_step(AttachmentStep::CreateInstance.as_str()))?;
        info!(workflow_id = ctx.workflow_id(), %instance_id, "instance created");

        ctx.enter_step(AttachmentStep::PollUntilRunning.as_str()).await;
        let polls = self
            .wait_until_running(ctx, &proxy, &instance_id)
            .await
            .map_err(|e| e.in_step(AttachmentStep::PollUntilRunning.as_str()))?;
        info!(workflow_id = ctx.workflow_id(), %instance_id, polls, "instance running");

        ctx.enter_step(AttachmentStep::RegisterInstance.as_str()).await;
        proxy
            .register_instance(&instance_id, &input.target_group_arn)
            .await
            .map_err(|e| e.in_step(AttachmentStep::RegisterInstance.as_str()))?;

        ctx.enter_step(AttachmentStep::Done.as_str()).await;
        Ok(format!("Instance successfully created: {}", instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::activities::{names, ActivityError};
    use crate::engine::storage::InMemoryExecutionStorage;
    use crate::engine::testing::{fast_policy, ScriptedActivities};
    use crate::models::InstanceState;
    use crate::ErrorKind;

    fn args() -> InstanceArgs {
        InstanceArgs {
            security_group_id: "sg-dev".to_string(),
            subnet_id: "subnet-us-west-2a-public".to_string(),
            target_group_arn: "arn:tg/vpc-dev".to_string(),
        }
    }

    fn setup() -> (Arc<ScriptedActivities>, InstanceAttachmentWorkflow, WorkflowContext) {
        let activities = Arc::new(ScriptedActivities::new());
        let workflow = InstanceAttachmentWorkflow::new(
            activities.clone(),
            fast_policy(),
            Duration::from_secs(10),
            Duration::from_secs(600),
        );
        let (ctx, _control) = WorkflowContext::new(
            "attach-1",
            WorkflowKind::InstanceAttachment,
            Arc::new(InMemoryExecutionStorage::new()),
        );
        (activities, workflow, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_running_then_registers() {
        let (activities, workflow, ctx) = setup();
        activities.script_states([InstanceState::Pending, InstanceState::Pending, InstanceState::Running]);
        let started = Instant::now();

        let message = workflow.run(&ctx, args()).await.unwrap();

        assert_eq!(message, "Instance successfully created: i-1");
        assert_eq!(activities.count(names::GET_INSTANCE_STATE), 3);
        assert_eq!(activities.count(names::REGISTER_INSTANCE), 1);
        assert_eq!(
            activities.calls_to(names::REGISTER_INSTANCE)[0].args,
            vec!["i-1", "arn:tg/vpc-dev"]
        );
        // One interval before each query
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_running_exhausts_polls() {
        let (activities, workflow, ctx) = setup();
        activities.settle_on(InstanceState::Pending);

        let error = workflow.run(&ctx, args()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PollExhausted);
        assert_eq!(error.step(), Some("poll_until_running"));
        assert_eq!(activities.count(names::GET_INSTANCE_STATE), 60);
        assert_eq!(activities.count(names::REGISTER_INSTANCE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_instance_id_is_rejected() {
        let (activities, workflow, ctx) = setup();
        activities.return_empty(names::CREATE_INSTANCE);

        let error = workflow.run(&ctx, args()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::EmptyResult);
        assert_eq!(activities.count(names::GET_INSTANCE_STATE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_failure_leaves_instance() {
        let (activities, workflow, ctx) = setup();
        activities.fail_always(
            names::REGISTER_INSTANCE,
            None,
            ActivityError::invalid_request("TargetGroupNotFound"),
        );

        let error = workflow.run(&ctx, args()).await.unwrap_err();

        assert_eq!(error.step(), Some("register_instance"));
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        // Non-retryable: one attempt, and no cleanup
        assert_eq!(activities.count(names::REGISTER_INSTANCE), 1);
        assert_eq!(activities.count(names::DELETE_INSTANCE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_arguments_make_no_calls() {
        let (activities, workflow, ctx) = setup();
        let mut input = args();
        input.subnet_id.clear();

        let error = workflow.run(&ctx, input).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PreconditionFailed);
        assert!(activities.calls().is_empty());
    }
}
