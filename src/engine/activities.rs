// Resource activities - the remote calls workflows are built from

//! # Resource Activities
//!
//! This module defines the interface between the workflows and whatever cloud
//! backend actually creates resources. Each method is one **activity**: a
//! single remote call that may fail and may be invoked more than once (at
//! least once delivery), so implementations should be as idempotent as the
//! backend allows.
//!
//! Activities never retry internally. Retries, timeouts and non-retryable
//! classification are applied from outside by `ActivityProxy` using the
//! workflow's `RetryPolicy`.
//!
//! ## Failure Reporting
//!
//! Every failure is an [`ActivityError`]: a kind used for retry decisions plus a
//! human-readable message.
//!
//! ## Rust Learning Notes:
//!
//! ### Async Traits
//! The `async-trait` crate lets the trait declare `async fn` methods and still
//! be used as `Arc<dyn ResourceActivities>`. Each method becomes a function
//! returning `Pin<Box<dyn Future + Send>>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{InstanceState, SubnetSpec};
use crate::ErrorKind;

/// Failure reported by a single activity invocation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ActivityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActivityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A failed remote call; retryable under the default policy
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteCallFailed, message)
    }

    /// The remote API rejected the request; not retryable by default
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

/// Remote operations the provisioning workflows are composed of
///
/// Identifier-returning activities hand back the raw identifier; workflows
/// treat an empty identifier as a logical failure.
#[async_trait::async_trait]
pub trait ResourceActivities: Send + Sync {
    /// Create the environment VPC and tag it with the environment name
    async fn create_vpc(&self, env: &str) -> Result<String, ActivityError>;

    /// Create one subnet of the catalog inside `vpc_id`
    async fn create_subnet(&self, vpc_id: &str, subnet: &SubnetSpec) -> Result<String, ActivityError>;

    /// Create an internet gateway and attach it to `vpc_id`
    async fn create_gateway(&self, vpc_id: &str, env: &str) -> Result<String, ActivityError>;

    async fn create_route_table(&self, vpc_id: &str) -> Result<String, ActivityError>;

    /// Add the default (0.0.0.0/0) route through `gateway_id`
    async fn add_route(&self, route_table_id: &str, gateway_id: &str) -> Result<(), ActivityError>;

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), ActivityError>;

    /// Create the environment security group
    ///
    /// Also authorizes inbound HTTP (port 80) from the internal range and from
    /// anywhere. That ingress policy is fixed, not a parameter.
    async fn create_security_group(&self, env: &str, vpc_id: &str) -> Result<String, ActivityError>;

    /// Create an internet-facing load balancer over `subnet_ids`
    async fn create_load_balancer(
        &self,
        env: &str,
        security_group_id: &str,
        subnet_ids: &[String],
    ) -> Result<String, ActivityError>;

    async fn create_target_group(&self, vpc_id: &str) -> Result<String, ActivityError>;

    /// Forward all listener traffic to the target group
    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError>;

    async fn create_instance(
        &self,
        security_group_id: &str,
        subnet_id: &str,
    ) -> Result<String, ActivityError>;

    async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState, ActivityError>;

    async fn register_instance(
        &self,
        instance_id: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError>;

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ActivityError>;
}

/// Activity names as they appear in logs and errors
pub mod names {
    pub const CREATE_VPC: &str = "create_vpc";
    pub const CREATE_SUBNET: &str = "create_subnet";
    pub const CREATE_GATEWAY: &str = "create_gateway";
    pub const CREATE_ROUTE_TABLE: &str = "create_route_table";
    pub const ADD_ROUTE: &str = "add_route";
    pub const ASSOCIATE_ROUTE_TABLE: &str = "associate_route_table";
    pub const CREATE_SECURITY_GROUP: &str = "create_security_group";
    pub const CREATE_LOAD_BALANCER: &str = "create_load_balancer";
    pub const CREATE_TARGET_GROUP: &str = "create_target_group";
    pub const CREATE_LISTENER: &str = "create_listener";
    pub const CREATE_INSTANCE: &str = "create_instance";
    pub const GET_INSTANCE_STATE: &str = "get_instance_state";
    pub const REGISTER_INSTANCE: &str = "register_instance";
    pub const DELETE_INSTANCE: &str = "delete_instance";
}
