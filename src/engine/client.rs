// Workflow client - starts executions, delivers signals and tracks what is running

//! # Workflow Client
//!
//! [`WorkflowClient`] is the entry point for everything outside the engine
//! (the HTTP server, the binaries, tests). It:
//!
//! - starts provisioning, instance-attachment and teardown executions
//! - keeps a registry of running executions keyed by workflow id
//! - delivers the `approveTeardown` signal and cancellation requests
//! - answers status queries from the execution records
//!
//! ## Workflow Ids
//!
//! At most one execution per workflow id runs at a time; starting a second
//! one fails with `WorkflowAlreadyRunning`. Once an execution finishes its id
//! can be used again. Without an explicit id the client picks one:
//!
//! | Workflow | Default id |
//! |---|---|
//! | provisioning | `provision-{env}` |
//! | instance attachment | `attach-{uuid}` |
//! | teardown | `teardown-{instance_id}` |
//!
//! so two provisioning runs for the same environment never overlap.
//!
//! ## Rust Learning Notes:
//!
//! ### DashMap Entry API
//! `running.entry(id)` locks only the shard holding `id`, so the
//! "is it running? if not, register it" check is atomic without a global
//! lock. The entry guard is dropped before any `.await`.
//!
//! ### Spawned Executions
//! Every execution runs on its own tokio task. `start_teardown` returns as
//! soon as the execution is registered; the other entry points await the
//! task's `JoinHandle`. Dropping that wait (a disconnected HTTP client, a
//! timeout around the call) leaves the execution running to completion, and
//! its record and id are still settled when it ends. Use
//! [`WorkflowClient::cancel`] to stop it. The client is `Clone` (every field
//! is an `Arc` or plain data) so a copy can move into the task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::activities::ResourceActivities;
use super::attachment::InstanceAttachmentWorkflow;
use super::context::{Signal, WorkflowContext, WorkflowControl};
use super::provisioning::ProvisioningWorkflow;
use super::storage::{ExecutionStorage, InMemoryExecutionStorage};
use super::teardown::TeardownWorkflow;
use super::workflow::Workflow;
use crate::config::ProvisionerConfig;
use crate::models::{
    EnvironmentArgs, EnvironmentOutput, InstanceArgs, RetryPolicy, SubnetCatalog, TeardownArgs,
    WorkflowExecution, WorkflowKind,
};
use crate::{ProvisionerError, Result};

/// Settings every execution started by a client shares
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry_policy: RetryPolicy,
    pub subnet_catalog: SubnetCatalog,
    /// Sleep between instance state queries
    pub poll_interval: Duration,
    /// Give up waiting for `running` after this long
    pub poll_deadline: Duration,
    /// How long a teardown waits for approval
    pub approval_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            subnet_catalog: SubnetCatalog::default(),
            poll_interval: Duration::from_secs(10),
            poll_deadline: Duration::from_secs(600),
            approval_timeout: Duration::from_secs(3600),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &ProvisionerConfig) -> Result<Self> {
        let poll_interval = Duration::from_secs(config.workflows.poll_interval_secs);
        if poll_interval.is_zero() {
            return Err(ProvisionerError::InvalidConfiguration(
                "poll interval must be positive".to_string(),
            ));
        }

        Ok(Self {
            retry_policy: config.retry_policy()?,
            subnet_catalog: config.subnet_catalog()?,
            poll_interval,
            poll_deadline: Duration::from_secs(config.workflows.poll_deadline_secs),
            approval_timeout: Duration::from_secs(config.workflows.approval_timeout_secs),
        })
    }
}

/// A teardown execution running in the background
///
/// Dropping the handle does not stop the execution.
pub struct TeardownHandle {
    workflow_id: String,
    join: JoinHandle<Result<String>>,
}

impl TeardownHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Wait for the teardown to finish
    pub async fn result(self) -> Result<String> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProvisionerError::Internal(format!(
                "teardown {} task failed: {}",
                self.workflow_id, e
            ))),
        }
    }
}

#[derive(Clone)]
pub struct WorkflowClient {
    activities: Arc<dyn ResourceActivities>,
    storage: Arc<dyn ExecutionStorage>,
    settings: EngineSettings,
    running: Arc<DashMap<String, WorkflowControl>>,
}

impl WorkflowClient {
    pub fn new(
        activities: Arc<dyn ResourceActivities>,
        storage: Arc<dyn ExecutionStorage>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            activities,
            storage,
            settings,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Client with in-memory execution records and default settings
    pub fn in_memory(activities: Arc<dyn ResourceActivities>) -> Self {
        Self::new(
            activities,
            Arc::new(InMemoryExecutionStorage::new()),
            EngineSettings::default(),
        )
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // Entry points

    /// Provision an environment and wait for the result
    pub async fn start_provisioning(&self, args: EnvironmentArgs) -> Result<EnvironmentOutput> {
        let workflow_id = format!("provision-{}", args.env.trim().to_lowercase());
        self.start_provisioning_with_id(workflow_id, args).await
    }

    pub async fn start_provisioning_with_id(
        &self,
        workflow_id: impl Into<String>,
        args: EnvironmentArgs,
    ) -> Result<EnvironmentOutput> {
        let workflow = ProvisioningWorkflow::new(
            self.activities.clone(),
            self.settings.retry_policy.clone(),
            self.settings.subnet_catalog.clone(),
        );
        self.execute(workflow_id.into(), workflow, args).await
    }

    /// Create an instance, wait until it runs and register it with the target group
    pub async fn start_instance_attachment(&self, args: InstanceArgs) -> Result<String> {
        let workflow_id = format!("attach-{}", uuid::Uuid::new_v4().simple());
        self.start_instance_attachment_with_id(workflow_id, args).await
    }

    pub async fn start_instance_attachment_with_id(
        &self,
        workflow_id: impl Into<String>,
        args: InstanceArgs,
    ) -> Result<String> {
        let workflow = InstanceAttachmentWorkflow::new(
            self.activities.clone(),
            self.settings.retry_policy.clone(),
            self.settings.poll_interval,
            self.settings.poll_deadline,
        );
        self.execute(workflow_id.into(), workflow, args).await
    }

    /// Start a teardown in the background
    ///
    /// The execution is registered before this returns, so an approval sent
    /// right afterwards is delivered.
    pub async fn start_teardown(&self, args: TeardownArgs) -> Result<TeardownHandle> {
        let workflow_id = format!("teardown-{}", args.instance_id.trim());
        self.start_teardown_with_id(workflow_id, args).await
    }

    pub async fn start_teardown_with_id(
        &self,
        workflow_id: impl Into<String>,
        args: TeardownArgs,
    ) -> Result<TeardownHandle> {
        let workflow_id = workflow_id.into();
        let workflow = TeardownWorkflow::new(
            self.activities.clone(),
            self.settings.retry_policy.clone(),
            self.settings.approval_timeout,
        );

        let ctx = self.register(&workflow_id, TeardownWorkflow::KIND, &args).await?;
        let join = self.spawn(ctx, workflow, args);

        Ok(TeardownHandle { workflow_id, join })
    }

    /// Deliver the `approveTeardown` signal to a running teardown
    pub fn approve_teardown(&self, workflow_id: &str) -> Result<()> {
        let kind = self
            .running
            .get(workflow_id)
            .map(|control| control.kind())
            .ok_or_else(|| ProvisionerError::WorkflowNotFound(workflow_id.to_string()))?;

        if kind != WorkflowKind::Teardown {
            return Err(ProvisionerError::PreconditionFailed(format!(
                "workflow {} is a {} workflow, not a teardown",
                workflow_id, kind
            )));
        }
        self.signal(workflow_id, Signal::ApproveTeardown)
    }

    /// Deliver a signal to a running execution
    pub fn signal(&self, workflow_id: &str, signal: Signal) -> Result<()> {
        let delivered = self
            .running
            .get(workflow_id)
            .map(|control| control.signal(signal))
            .unwrap_or(false);

        if !delivered {
            return Err(ProvisionerError::WorkflowNotFound(workflow_id.to_string()));
        }
        info!(workflow_id, signal = %signal, "signal delivered");
        Ok(())
    }

    /// Request cancellation of a running execution
    ///
    /// The execution unwinds at its next suspension point with `Cancelled`.
    pub fn cancel(&self, workflow_id: &str) -> Result<()> {
        let control = self
            .running
            .get(workflow_id)
            .ok_or_else(|| ProvisionerError::WorkflowNotFound(workflow_id.to_string()))?;
        control.cancel();
        info!(workflow_id, "cancellation requested");
        Ok(())
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.running.contains_key(workflow_id)
    }

    /// Execution record of `workflow_id`, running or finished
    pub async fn describe(&self, workflow_id: &str) -> Result<WorkflowExecution> {
        self.storage
            .get_execution(workflow_id)
            .await?
            .ok_or_else(|| ProvisionerError::WorkflowNotFound(workflow_id.to_string()))
    }

    pub async fn list(&self, kind: Option<WorkflowKind>) -> Result<Vec<WorkflowExecution>> {
        self.storage.list_executions(kind).await
    }

    // Execution plumbing

    async fn execute<W: Workflow>(
        &self,
        workflow_id: String,
        workflow: W,
        input: W::Input,
    ) -> Result<W::Output> {
        let ctx = self.register(&workflow_id, W::KIND, &input).await?;
        match self.spawn(ctx, workflow, input).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProvisionerError::Internal(format!(
                "workflow {} task failed: {}",
                workflow_id, e
            ))),
        }
    }

    /// Run a registered execution on its own task
    fn spawn<W: Workflow>(
        &self,
        ctx: WorkflowContext,
        workflow: W,
        input: W::Input,
    ) -> JoinHandle<Result<W::Output>> {
        let client = self.clone();
        tokio::spawn(async move { client.drive(ctx, workflow, input).await })
    }

    /// Claim `workflow_id` and create its execution record
    async fn register<I: Serialize>(
        &self,
        workflow_id: &str,
        kind: WorkflowKind,
        input: &I,
    ) -> Result<WorkflowContext> {
        let input = serde_json::to_value(input)?;
        let (ctx, control) = WorkflowContext::new(workflow_id, kind, self.storage.clone());

        match self.running.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ProvisionerError::WorkflowAlreadyRunning(workflow_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(control);
            }
        }
        let mut claim = IdClaim {
            running: &self.running,
            workflow_id,
            keep: false,
        };

        let record = WorkflowExecution::new(workflow_id, kind, input);
        self.storage.create_execution(record).await?;
        claim.keep = true;

        info!(workflow_id, %kind, "workflow started");
        Ok(ctx)
    }

    async fn drive<W: Workflow>(
        &self,
        ctx: WorkflowContext,
        workflow: W,
        input: W::Input,
    ) -> Result<W::Output> {
        let outcome = match AssertUnwindSafe(workflow.run(&ctx, input))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ProvisionerError::Internal(format!(
                "workflow panicked: {}",
                panic_message(&*panic)
            ))),
        };
        self.finish(ctx.workflow_id(), &outcome).await;
        outcome
    }

    /// Write the outcome to the record, then release the workflow id
    async fn finish<T: Serialize>(&self, workflow_id: &str, outcome: &Result<T>) {
        match self.storage.get_execution(workflow_id).await {
            Ok(Some(mut record)) => {
                match outcome {
                    Ok(output) => match serde_json::to_value(output) {
                        Ok(value) => record.complete(value),
                        Err(e) => record.fail(&ProvisionerError::Serialization(e)),
                    },
                    Err(e) => record.fail(e),
                }
                if let Err(e) = self.storage.update_execution(record).await {
                    warn!(workflow_id, error = %e, "failed to store workflow outcome");
                }
            }
            Ok(None) => warn!(workflow_id, "execution record disappeared"),
            Err(e) => warn!(workflow_id, error = %e, "failed to load execution record"),
        }

        self.running.remove(workflow_id);

        match outcome {
            Ok(_) => info!(workflow_id, "workflow completed"),
            Err(e) => error!(workflow_id, kind = %e.kind(), step = e.step(), error = %e, "workflow failed"),
        }
    }
}

/// Releases a claimed workflow id unless the claim is kept
///
/// Covers registration being abandoned between claiming the id and storing
/// the execution record.
struct IdClaim<'a> {
    running: &'a DashMap<String, WorkflowControl>,
    workflow_id: &'a str,
    keep: bool,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.running.remove(self.workflow_id);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
