// Retry execution - applies a RetryPolicy to activity calls

//! # Retry Engine
//!
//! Two pieces live here:
//!
//! - [`RetryPolicy::execute`]: runs one named operation under a policy,
//!   bounding each attempt by the per-call timeout, backing off between
//!   retryable failures and giving up after `max_attempts` or on the first
//!   non-retryable failure.
//! - [`ActivityProxy`]: wraps a plain [`ResourceActivities`] implementation so
//!   that every call goes through `execute` with the workflow's policy and
//!   cancellation token. Workflow code calls the proxy and never sees retry
//!   mechanics.
//!
//! Both suspension points (the attempt itself and the backoff sleep) observe
//! the execution's cancellation token.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activities::{names, ActivityError, ResourceActivities};
use crate::models::{InstanceState, RetryPolicy, SubnetSpec};
use crate::{ProvisionerError, Result};

impl RetryPolicy {
    /// Run `op` under this policy
    ///
    /// `op` is invoked once per attempt. The terminal error names `activity`,
    /// the number of attempts made and the last underlying failure.
    pub async fn execute<T, F, Fut>(
        &self,
        activity: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ActivityError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(activity, attempt, "invoking activity");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProvisionerError::Cancelled(format!(
                        "activity {} interrupted on attempt {}",
                        activity, attempt
                    )));
                }
                outcome = tokio::time::timeout(self.per_call_timeout, op()) => outcome,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!(activity, attempt, "activity succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_) => ActivityError::timeout(format!(
                    "{} did not complete within {:?}",
                    activity, self.per_call_timeout
                )),
            };

            if !self.is_retryable(error.kind) || attempt >= max_attempts {
                warn!(activity, attempt, kind = %error.kind, error = %error, "activity failed permanently");
                return Err(ProvisionerError::ActivityFailed {
                    activity: activity.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                activity,
                attempt,
                max_attempts,
                ?delay,
                error = %error,
                "activity attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ProvisionerError::Cancelled(format!(
                        "activity {} interrupted while backing off",
                        activity
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Activity decorator that applies one retry policy to every call
///
/// One proxy is created per workflow execution, so it shares that execution's
/// cancellation token.
#[derive(Clone)]
pub struct ActivityProxy {
    inner: Arc<dyn ResourceActivities>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ActivityProxy {
    pub fn new(
        inner: Arc<dyn ResourceActivities>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn create_vpc(&self, env: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_VPC, &self.cancel, || self.inner.create_vpc(env))
            .await
    }

    pub async fn create_subnet(&self, vpc_id: &str, subnet: &SubnetSpec) -> Result<String> {
        self.policy
            .execute(names::CREATE_SUBNET, &self.cancel, || {
                self.inner.create_subnet(vpc_id, subnet)
            })
            .await
    }

    pub async fn create_gateway(&self, vpc_id: &str, env: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_GATEWAY, &self.cancel, || {
                self.inner.create_gateway(vpc_id, env)
            })
            .await
    }

    pub async fn create_route_table(&self, vpc_id: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_ROUTE_TABLE, &self.cancel, || {
                self.inner.create_route_table(vpc_id)
            })
            .await
    }

    pub async fn add_route(&self, route_table_id: &str, gateway_id: &str) -> Result<()> {
        self.policy
            .execute(names::ADD_ROUTE, &self.cancel, || {
                self.inner.add_route(route_table_id, gateway_id)
            })
            .await
    }

    pub async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<()> {
        self.policy
            .execute(names::ASSOCIATE_ROUTE_TABLE, &self.cancel, || {
                self.inner.associate_route_table(route_table_id, subnet_id)
            })
            .await
    }

    pub async fn create_security_group(&self, env: &str, vpc_id: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_SECURITY_GROUP, &self.cancel, || {
                self.inner.create_security_group(env, vpc_id)
            })
            .await
    }

    pub async fn create_load_balancer(
        &self,
        env: &str,
        security_group_id: &str,
        subnet_ids: &[String],
    ) -> Result<String> {
        self.policy
            .execute(names::CREATE_LOAD_BALANCER, &self.cancel, || {
                self.inner
                    .create_load_balancer(env, security_group_id, subnet_ids)
            })
            .await
    }

    pub async fn create_target_group(&self, vpc_id: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_TARGET_GROUP, &self.cancel, || {
                self.inner.create_target_group(vpc_id)
            })
            .await
    }

    pub async fn create_listener(&self, load_balancer_arn: &str, target_group_arn: &str) -> Result<()> {
        self.policy
            .execute(names::CREATE_LISTENER, &self.cancel, || {
                self.inner.create_listener(load_balancer_arn, target_group_arn)
            })
            .await
    }

    pub async fn create_instance(&self, security_group_id: &str, subnet_id: &str) -> Result<String> {
        self.policy
            .execute(names::CREATE_INSTANCE, &self.cancel, || {
                self.inner.create_instance(security_group_id, subnet_id)
            })
            .await
    }

    pub async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        self.policy
            .execute(names::GET_INSTANCE_STATE, &self.cancel, || {
                self.inner.get_instance_state(instance_id)
            })
            .await
    }

    pub async fn register_instance(&self, instance_id: &str, target_group_arn: &str) -> Result<()> {
        self.policy
            .execute(names::REGISTER_INSTANCE, &self.cancel, || {
                self.inner.register_instance(instance_id, target_group_arn)
            })
            .await
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.policy
            .execute(names::DELETE_INSTANCE, &self.cancel, || {
                self.inner.delete_instance(instance_id)
            })
            .await
    }
}
