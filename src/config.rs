// Configuration for the provisioner server and engine

//! # Configuration
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`ProvisionerConfig::default`])
//! 2. An optional config file (`provisioner.toml`, or any format the `config`
//!    crate recognises by extension)
//! 3. Environment variables prefixed `PROVISIONER__`, with `__` between
//!    nesting levels, e.g. `PROVISIONER__SERVER__PORT=9090` or
//!    `PROVISIONER__WORKFLOWS__APPROVAL_TIMEOUT_SECS=600`
//!
//! The binaries load a `.env` file with `dotenv` before reading the
//! environment.
//!
//! ## Example File
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [retry]
//! max_attempts = 3
//!
//! [workflows]
//! approval_timeout_secs = 1800
//!
//! [[subnets]]
//! cidr = "172.1.0.0/20"
//! availability_zone = "us-west-2a"
//! tag = "us-west-2a-public"
//! # ... exactly four entries, public pair first
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{RetryPolicy, SubnetCatalog, SubnetSpec};
use crate::{ErrorKind, Result};

/// Prefix of environment variables read by [`ProvisionerConfig::load`]
pub const ENV_PREFIX: &str = "PROVISIONER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub workflows: WorkflowTimings,

    /// Subnet layout; must hold exactly four entries
    #[serde(default = "default_subnets")]
    pub subnets: Vec<SubnetSettings>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            cloud: CloudSettings::default(),
            retry: RetrySettings::default(),
            workflows: WorkflowTimings::default(),
            subnets: default_subnets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// Settings of the in-memory cloud backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub region: String,
    pub account_id: String,
    pub vpc_cidr: String,
    pub image_id: String,
    pub instance_type: String,
    /// State queries an instance answers with `pending` before it runs
    pub boot_polls: u32,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            account_id: "000000000000".to_string(),
            vpc_cidr: "172.1.0.0/16".to_string(),
            image_id: "ami-0c103e518ca8d895d".to_string(),
            instance_type: "t2.micro".to_string(),
            boot_polls: 2,
        }
    }
}

/// Retry policy settings, durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    /// 0 disables the cap
    pub maximum_interval_ms: u64,
    pub max_attempts: u32,
    pub per_call_timeout_ms: u64,
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 100_000,
            max_attempts: 5,
            per_call_timeout_ms: 60_000,
            non_retryable: vec![
                ErrorKind::PreconditionFailed,
                ErrorKind::InvalidRequest,
                ErrorKind::EmptyResult,
            ],
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            backoff_coefficient: settings.backoff_coefficient,
            maximum_interval: (settings.maximum_interval_ms > 0)
                .then(|| Duration::from_millis(settings.maximum_interval_ms)),
            max_attempts: settings.max_attempts,
            per_call_timeout: Duration::from_millis(settings.per_call_timeout_ms),
            non_retryable_kinds: settings.non_retryable.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowTimings {
    pub poll_interval_secs: u64,
    pub poll_deadline_secs: u64,
    pub approval_timeout_secs: u64,
}

impl Default for WorkflowTimings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            poll_deadline_secs: 600,
            approval_timeout_secs: 3600,
        }
    }
}

/// One subnet entry of the config file
///
/// Kept separate from `SubnetSpec` because config keys are matched in lower
/// snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSettings {
    pub cidr: String,
    pub availability_zone: String,
    pub tag: String,
}

impl From<&SubnetSettings> for SubnetSpec {
    fn from(settings: &SubnetSettings) -> Self {
        SubnetSpec::new(&settings.cidr, &settings.availability_zone, &settings.tag)
    }
}

impl From<SubnetSpec> for SubnetSettings {
    fn from(spec: SubnetSpec) -> Self {
        SubnetSettings {
            cidr: spec.cidr,
            availability_zone: spec.availability_zone,
            tag: spec.tag,
        }
    }
}

fn default_subnets() -> Vec<SubnetSettings> {
    Vec::<SubnetSpec>::from(SubnetCatalog::default())
        .into_iter()
        .map(SubnetSettings::from)
        .collect()
}

impl ProvisionerConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&ProvisionerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: ProvisionerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::from(&self.retry);
        policy.validate()?;
        Ok(policy)
    }

    pub fn subnet_catalog(&self) -> Result<SubnetCatalog> {
        SubnetCatalog::new(self.subnets.iter().map(SubnetSpec::from).collect())
    }
}
