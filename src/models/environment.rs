// Environment domain models - workflow inputs and outputs

//! # Environment Models
//!
//! This module defines the values that flow in and out of the workflows:
//! - `EnvironmentArgs` / `EnvironmentOutput`: provisioning input and result
//! - `SubnetSpec` / `SubnetCatalog`: the ordered subnet layout of an environment
//! - `InstanceArgs` / `TeardownArgs`: inputs of the instance workflows
//! - `InstanceState`: lifecycle states reported by the compute API
//!
//! All of them serialize with camelCase field names so that HTTP clients see
//! `vpcId`, `loadBalancerArn`, `subnetIds` and so on.

use serde::{Deserialize, Serialize};

use crate::{ProvisionerError, Result};

/// Number of subnets an environment is built from
pub const SUBNET_COUNT: usize = 4;

/// Number of leading catalog entries that are public
///
/// Only these subnets are associated with the route table and attached to the
/// load balancer.
pub const PUBLIC_SUBNET_COUNT: usize = 2;

/// Input to the provisioning workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArgs {
    /// Environment name, e.g. "dev". Used in resource names and tags.
    #[serde(default)]
    pub env: String,
}

impl EnvironmentArgs {
    pub fn new(env: impl Into<String>) -> Self {
        Self { env: env.into() }
    }

    /// Check the caller supplied an environment name
    ///
    /// A missing name is a caller bug, not a transient condition, so it is
    /// reported as `PreconditionFailed` and never retried.
    pub fn validate(&self) -> Result<&str> {
        let env = self.env.trim();
        if env.is_empty() {
            return Err(ProvisionerError::PreconditionFailed(
                "environment name must not be empty".to_string(),
            ));
        }
        Ok(env)
    }
}

/// Identifiers of a fully provisioned environment
///
/// Produced exactly once, at the end of a successful provisioning run. Every
/// field comes from a successful activity result; a run that fails part way
/// never yields one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOutput {
    pub vpc_id: String,
    pub load_balancer_arn: String,
    pub security_group_id: String,
    /// All subnet ids, in catalog order (public pair first)
    pub subnet_ids: Vec<String>,
    pub target_group_arn: String,
}

impl EnvironmentOutput {
    /// The public subnet pair the load balancer is attached to
    pub fn public_subnet_ids(&self) -> &[String] {
        let end = PUBLIC_SUBNET_COUNT.min(self.subnet_ids.len());
        &self.subnet_ids[..end]
    }
}

/// One subnet of the environment layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// CIDR block inside the VPC range, e.g. "172.1.0.0/20"
    pub cidr: String,
    /// Availability zone, e.g. "us-west-2a"
    pub availability_zone: String,
    /// Value of the `Name` tag, e.g. "us-west-2a-public"
    pub tag: String,
}

impl SubnetSpec {
    pub fn new(
        cidr: impl Into<String>,
        availability_zone: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            cidr: cidr.into(),
            availability_zone: availability_zone.into(),
            tag: tag.into(),
        }
    }
}

/// Ordered subnet layout injected into the provisioning workflow
///
/// Always exactly [`SUBNET_COUNT`] entries. Order matters: the first
/// [`PUBLIC_SUBNET_COUNT`] entries (one per availability zone) are the public
/// pair, the rest are private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SubnetSpec>", into = "Vec<SubnetSpec>")]
pub struct SubnetCatalog {
    entries: Vec<SubnetSpec>,
}

impl SubnetCatalog {
    /// Build a catalog, rejecting layouts with the wrong number of entries
    pub fn new(entries: Vec<SubnetSpec>) -> Result<Self> {
        if entries.len() != SUBNET_COUNT {
            return Err(ProvisionerError::InvalidConfiguration(format!(
                "subnet catalog must have exactly {} entries, got {}",
                SUBNET_COUNT,
                entries.len()
            )));
        }
        if let Some(blank) = entries
            .iter()
            .find(|s| s.cidr.trim().is_empty() || s.availability_zone.trim().is_empty())
        {
            return Err(ProvisionerError::InvalidConfiguration(format!(
                "subnet '{}' needs both a cidr and an availability zone",
                blank.tag
            )));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SubnetSpec] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubnetSpec> {
        self.entries.iter()
    }

    pub fn public(&self) -> &[SubnetSpec] {
        &self.entries[..PUBLIC_SUBNET_COUNT]
    }

    pub fn private(&self) -> &[SubnetSpec] {
        &self.entries[PUBLIC_SUBNET_COUNT..]
    }
}

impl Default for SubnetCatalog {
    /// Two public and two private /20 subnets across us-west-2a and us-west-2b
    fn default() -> Self {
        Self {
            entries: vec![
                SubnetSpec::new("172.1.0.0/20", "us-west-2a", "us-west-2a-public"),
                SubnetSpec::new("172.1.16.0/20", "us-west-2b", "us-west-2b-public"),
                SubnetSpec::new("172.1.128.0/20", "us-west-2a", "us-west-2a-private"),
                SubnetSpec::new("172.1.144.0/20", "us-west-2b", "us-west-2b-private"),
            ],
        }
    }
}

impl TryFrom<Vec<SubnetSpec>> for SubnetCatalog {
    type Error = ProvisionerError;

    fn try_from(entries: Vec<SubnetSpec>) -> Result<Self> {
        SubnetCatalog::new(entries)
    }
}

impl From<SubnetCatalog> for Vec<SubnetSpec> {
    fn from(catalog: SubnetCatalog) -> Self {
        catalog.entries
    }
}

/// Input to the instance-attachment workflow
///
/// All three ids must come from a prior provisioning run. Nothing beyond the
/// remote calls themselves checks that they exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceArgs {
    pub security_group_id: String,
    pub subnet_id: String,
    pub target_group_arn: String,
}

impl InstanceArgs {
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("securityGroupId", &self.security_group_id),
            ("subnetId", &self.subnet_id),
            ("targetGroupArn", &self.target_group_arn),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProvisionerError::PreconditionFailed(format!(
                "instance arguments missing: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Input to the teardown workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownArgs {
    #[serde(default)]
    pub instance_id: String,
}

impl TeardownArgs {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    pub fn validate(&self) -> Result<&str> {
        let instance_id = self.instance_id.trim();
        if instance_id.is_empty() {
            return Err(ProvisionerError::PreconditionFailed(
                "instance id must not be empty".to_string(),
            ));
        }
        Ok(instance_id)
    }
}

/// Lifecycle state of a compute instance as reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        matches!(self, InstanceState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
