// In-memory cloud - a ResourceActivities backend that keeps resources in a map

//! # In-Memory Cloud
//!
//! [`InMemoryCloud`] implements [`ResourceActivities`] without talking to any
//! provider. It keeps every created resource in a `DashMap` and enforces the
//! same reference rules a real API would:
//!
//! - a subnet, gateway, route table, security group or target group needs an
//!   existing VPC
//! - a load balancer needs an existing security group and at least two
//!   existing subnets in different availability zones
//! - a listener needs an existing load balancer and target group
//! - only running instances can be registered with a target group
//!
//! Violations are reported as `InvalidRequest`, which the default retry policy
//! does not retry.
//!
//! Instances boot: a new instance reports `pending` for the first
//! `boot_polls` state queries and `running` afterwards.
//!
//! The server binary uses this backend so the whole system can be exercised
//! end to end on one machine.
//!
//! ## Rust Learning Notes:
//!
//! ### DashMap Guards
//! `get` and `get_mut` return guards that lock one shard of the map. Holding a
//! guard while asking for another key can deadlock if both keys share a
//! shard, so every method below finishes its reads (dropping the guards)
//! before it takes a `get_mut`.

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::activities::{ActivityError, ResourceActivities};
use crate::config::CloudSettings;
use crate::models::{InstanceState, SubnetSpec};

/// CIDR that the security group admits alongside the open internet
pub const INTERNAL_INGRESS_CIDR: &str = "172.1.0.0/20";

/// Port the security group, target group and listener all use
pub const HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngressRule {
    pub protocol: String,
    pub port: u16,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: String,
    pub gateway_id: String,
}

/// One resource held by the in-memory cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudResource {
    Vpc {
        env: String,
        cidr: String,
    },
    Subnet {
        vpc_id: String,
        cidr: String,
        availability_zone: String,
        tag: String,
    },
    InternetGateway {
        vpc_id: String,
        tag: String,
    },
    RouteTable {
        vpc_id: String,
        routes: Vec<Route>,
        associations: Vec<String>,
    },
    SecurityGroup {
        vpc_id: String,
        name: String,
        ingress: Vec<IngressRule>,
    },
    LoadBalancer {
        name: String,
        security_group_id: String,
        subnet_ids: Vec<String>,
        internet_facing: bool,
    },
    TargetGroup {
        vpc_id: String,
        name: String,
        port: u16,
        targets: Vec<String>,
    },
    Listener {
        load_balancer_arn: String,
        target_group_arn: String,
        port: u16,
    },
    Instance {
        security_group_id: String,
        subnet_id: String,
        image_id: String,
        instance_type: String,
        state: InstanceState,
        state_queries: u32,
    },
}

impl CloudResource {
    pub fn type_name(&self) -> &'static str {
        match self {
            CloudResource::Vpc { .. } => "vpc",
            CloudResource::Subnet { .. } => "subnet",
            CloudResource::InternetGateway { .. } => "internet_gateway",
            CloudResource::RouteTable { .. } => "route_table",
            CloudResource::SecurityGroup { .. } => "security_group",
            CloudResource::LoadBalancer { .. } => "load_balancer",
            CloudResource::TargetGroup { .. } => "target_group",
            CloudResource::Listener { .. } => "listener",
            CloudResource::Instance { .. } => "instance",
        }
    }
}

pub struct InMemoryCloud {
    settings: CloudSettings,
    /// Key: resource id or ARN
    resources: DashMap<String, CloudResource>,
}

impl InMemoryCloud {
    pub fn new(settings: CloudSettings) -> Self {
        Self {
            settings,
            resources: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &CloudSettings {
        &self.settings
    }

    pub fn resource(&self, id: &str) -> Option<CloudResource> {
        self.resources.get(id).map(|r| r.value().clone())
    }

    /// Number of resources of one type, e.g. `"subnet"`
    pub fn count(&self, type_name: &str) -> usize {
        self.resources
            .iter()
            .filter(|r| r.value().type_name() == type_name)
            .count()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        match self.resource(instance_id)? {
            CloudResource::Instance { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn targets(&self, target_group_arn: &str) -> Vec<String> {
        match self.resource(target_group_arn) {
            Some(CloudResource::TargetGroup { targets, .. }) => targets,
            _ => Vec::new(),
        }
    }

    fn new_id(prefix: &str) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{}-{}", prefix, &hex[..17])
    }

    fn arn(&self, resource: &str) -> String {
        format!(
            "arn:aws:elasticloadbalancing:{}:{}:{}",
            self.settings.region, self.settings.account_id, resource
        )
    }

    fn not_found(type_name: &str, id: &str) -> ActivityError {
        ActivityError::invalid_request(format!("{} {} does not exist", type_name, id))
    }

    fn require_vpc(&self, vpc_id: &str) -> Result<(), ActivityError> {
        match self.resource(vpc_id) {
            Some(CloudResource::Vpc { .. }) => Ok(()),
            _ => Err(Self::not_found("vpc", vpc_id)),
        }
    }

    /// Availability zone of an existing subnet
    fn subnet_zone(&self, subnet_id: &str) -> Result<String, ActivityError> {
        match self.resource(subnet_id) {
            Some(CloudResource::Subnet {
                availability_zone, ..
            }) => Ok(availability_zone),
            _ => Err(Self::not_found("subnet", subnet_id)),
        }
    }

    fn require_type(&self, id: &str, type_name: &str) -> Result<CloudResource, ActivityError> {
        match self.resource(id) {
            Some(resource) if resource.type_name() == type_name => Ok(resource),
            _ => Err(Self::not_found(type_name, id)),
        }
    }

    fn insert(&self, id: String, resource: CloudResource) -> String {
        debug!(id = %id, resource = resource.type_name(), "resource created");
        self.resources.insert(id.clone(), resource);
        id
    }
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new(CloudSettings::default())
    }
}

#[async_trait::async_trait]
impl ResourceActivities for InMemoryCloud {
    async fn create_vpc(&self, env: &str) -> Result<String, ActivityError> {
        let id = Self::new_id("vpc");
        Ok(self.insert(
            id,
            CloudResource::Vpc {
                env: env.to_string(),
                cidr: self.settings.vpc_cidr.clone(),
            },
        ))
    }

    async fn create_subnet(&self, vpc_id: &str, subnet: &SubnetSpec) -> Result<String, ActivityError> {
        self.require_vpc(vpc_id)?;
        if subnet.cidr.trim().is_empty() {
            return Err(ActivityError::invalid_request("subnet cidr must not be empty"));
        }

        let conflict = self.resources.iter().any(|r| {
            matches!(r.value(), CloudResource::Subnet { vpc_id: v, cidr, .. } if v == vpc_id && cidr == &subnet.cidr)
        });
        if conflict {
            return Err(ActivityError::invalid_request(format!(
                "cidr {} conflicts with an existing subnet in {}",
                subnet.cidr, vpc_id
            )));
        }

        Ok(self.insert(
            Self::new_id("subnet"),
            CloudResource::Subnet {
                vpc_id: vpc_id.to_string(),
                cidr: subnet.cidr.clone(),
                availability_zone: subnet.availability_zone.clone(),
                tag: subnet.tag.clone(),
            },
        ))
    }

    async fn create_gateway(&self, vpc_id: &str, env: &str) -> Result<String, ActivityError> {
        self.require_vpc(vpc_id)?;
        Ok(self.insert(
            Self::new_id("igw"),
            CloudResource::InternetGateway {
                vpc_id: vpc_id.to_string(),
                tag: format!("{}-internet-gateway", env),
            },
        ))
    }

    async fn create_route_table(&self, vpc_id: &str) -> Result<String, ActivityError> {
        self.require_vpc(vpc_id)?;
        Ok(self.insert(
            Self::new_id("rtb"),
            CloudResource::RouteTable {
                vpc_id: vpc_id.to_string(),
                routes: Vec::new(),
                associations: Vec::new(),
            },
        ))
    }

    async fn add_route(&self, route_table_id: &str, gateway_id: &str) -> Result<(), ActivityError> {
        self.require_type(gateway_id, "internet_gateway")?;
        self.require_type(route_table_id, "route_table")?;

        if let Some(mut entry) = self.resources.get_mut(route_table_id) {
            if let CloudResource::RouteTable { routes, .. } = entry.value_mut() {
                let route = Route {
                    destination: "0.0.0.0/0".to_string(),
                    gateway_id: gateway_id.to_string(),
                };
                if !routes.contains(&route) {
                    routes.push(route);
                }
            }
        }
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), ActivityError> {
        self.subnet_zone(subnet_id)?;
        self.require_type(route_table_id, "route_table")?;

        if let Some(mut entry) = self.resources.get_mut(route_table_id) {
            if let CloudResource::RouteTable { associations, .. } = entry.value_mut() {
                if !associations.iter().any(|s| s == subnet_id) {
                    associations.push(subnet_id.to_string());
                }
            }
        }
        Ok(())
    }

    async fn create_security_group(&self, env: &str, vpc_id: &str) -> Result<String, ActivityError> {
        self.require_vpc(vpc_id)?;

        let ingress = [INTERNAL_INGRESS_CIDR, "0.0.0.0/0"]
            .into_iter()
            .map(|cidr| IngressRule {
                protocol: "tcp".to_string(),
                port: HTTP_PORT,
                cidr: cidr.to_string(),
            })
            .collect();

        Ok(self.insert(
            Self::new_id("sg"),
            CloudResource::SecurityGroup {
                vpc_id: vpc_id.to_string(),
                name: format!("{}-security-group", env),
                ingress,
            },
        ))
    }

    async fn create_load_balancer(
        &self,
        env: &str,
        security_group_id: &str,
        subnet_ids: &[String],
    ) -> Result<String, ActivityError> {
        self.require_type(security_group_id, "security_group")?;

        let mut zones = Vec::with_capacity(subnet_ids.len());
        for subnet_id in subnet_ids {
            let zone = self.subnet_zone(subnet_id)?;
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }
        if zones.len() < 2 {
            return Err(ActivityError::invalid_request(
                "a load balancer needs subnets in at least two availability zones",
            ));
        }

        let name = format!("{}-load-balancer", env);
        let existing = self.resources.iter().find_map(|r| match r.value() {
            CloudResource::LoadBalancer {
                name: n,
                security_group_id: sg,
                subnet_ids: subnets,
                ..
            } if n == &name => Some((r.key().clone(), sg == security_group_id && subnets == subnet_ids)),
            _ => None,
        });
        match existing {
            Some((arn, true)) => return Ok(arn),
            Some((_, false)) => {
                return Err(ActivityError::invalid_request(format!(
                    "a load balancer named {} already exists with a different configuration",
                    name
                )));
            }
            None => {}
        }

        let arn = self.arn(&format!(
            "loadbalancer/app/{}/{}",
            name,
            &Uuid::new_v4().simple().to_string()[..16]
        ));
        Ok(self.insert(
            arn,
            CloudResource::LoadBalancer {
                name,
                security_group_id: security_group_id.to_string(),
                subnet_ids: subnet_ids.to_vec(),
                internet_facing: true,
            },
        ))
    }

    async fn create_target_group(&self, vpc_id: &str) -> Result<String, ActivityError> {
        self.require_vpc(vpc_id)?;

        let existing = self.resources.iter().find_map(|r| match r.value() {
            CloudResource::TargetGroup { vpc_id: v, .. } if v == vpc_id => Some(r.key().clone()),
            _ => None,
        });
        if let Some(arn) = existing {
            return Ok(arn);
        }

        let suffix = vpc_id.trim_start_matches("vpc-");
        let name = format!("tg-{}", &suffix[..suffix.len().min(8)]);
        let arn = self.arn(&format!(
            "targetgroup/{}/{}",
            name,
            &Uuid::new_v4().simple().to_string()[..16]
        ));
        Ok(self.insert(
            arn,
            CloudResource::TargetGroup {
                vpc_id: vpc_id.to_string(),
                name,
                port: HTTP_PORT,
                targets: Vec::new(),
            },
        ))
    }

    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError> {
        self.require_type(load_balancer_arn, "load_balancer")?;
        self.require_type(target_group_arn, "target_group")?;

        let listener_arn = format!("{}/listener/{}", load_balancer_arn, HTTP_PORT);
        self.insert(
            listener_arn,
            CloudResource::Listener {
                load_balancer_arn: load_balancer_arn.to_string(),
                target_group_arn: target_group_arn.to_string(),
                port: HTTP_PORT,
            },
        );
        Ok(())
    }

    async fn create_instance(
        &self,
        security_group_id: &str,
        subnet_id: &str,
    ) -> Result<String, ActivityError> {
        self.require_type(security_group_id, "security_group")?;
        self.subnet_zone(subnet_id)?;

        Ok(self.insert(
            Self::new_id("i"),
            CloudResource::Instance {
                security_group_id: security_group_id.to_string(),
                subnet_id: subnet_id.to_string(),
                image_id: self.settings.image_id.clone(),
                instance_type: self.settings.instance_type.clone(),
                state: InstanceState::Pending,
                state_queries: 0,
            },
        ))
    }

    async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState, ActivityError> {
        let mut entry = self
            .resources
            .get_mut(instance_id)
            .ok_or_else(|| Self::not_found("instance", instance_id))?;

        match entry.value_mut() {
            CloudResource::Instance {
                state,
                state_queries,
                ..
            } => {
                *state_queries += 1;
                if *state == InstanceState::Pending && *state_queries > self.settings.boot_polls {
                    *state = InstanceState::Running;
                }
                Ok(*state)
            }
            _ => Err(Self::not_found("instance", instance_id)),
        }
    }

    async fn register_instance(
        &self,
        instance_id: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError> {
        match self.require_type(instance_id, "instance")? {
            CloudResource::Instance { state, .. } if state.is_running() => {}
            CloudResource::Instance { state, .. } => {
                return Err(ActivityError::invalid_request(format!(
                    "instance {} is {}, only running instances can be registered",
                    instance_id, state
                )));
            }
            _ => return Err(Self::not_found("instance", instance_id)),
        }
        self.require_type(target_group_arn, "target_group")?;

        if let Some(mut entry) = self.resources.get_mut(target_group_arn) {
            if let CloudResource::TargetGroup { targets, .. } = entry.value_mut() {
                if !targets.iter().any(|t| t == instance_id) {
                    targets.push(instance_id.to_string());
                }
            }
        }
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ActivityError> {
        self.require_type(instance_id, "instance")?;

        // Terminated instances leave every target group
        for mut entry in self.resources.iter_mut() {
            if let CloudResource::TargetGroup { targets, .. } = entry.value_mut() {
                targets.retain(|t| t != instance_id);
            }
        }

        if let Some(mut entry) = self.resources.get_mut(instance_id) {
            if let CloudResource::Instance { state, .. } = entry.value_mut() {
                *state = InstanceState::Terminated;
            }
        }
        debug!(instance_id, "instance terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::client::{EngineSettings, WorkflowClient};
    use crate::engine::storage::InMemoryExecutionStorage;
    use crate::models::{EnvironmentArgs, InstanceArgs, SubnetCatalog, TeardownArgs};
    use crate::ErrorKind;
    use std::sync::Arc;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_secs(1),
            poll_deadline: Duration::from_secs(30),
            ..EngineSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_lifecycle() {
        let cloud = Arc::new(InMemoryCloud::default());
        let client = WorkflowClient::new(
            cloud.clone(),
            Arc::new(InMemoryExecutionStorage::new()),
            settings(),
        );

        let env = client
            .start_provisioning(EnvironmentArgs::new("dev"))
            .await
            .unwrap();

        assert_eq!(cloud.count("subnet"), 4);
        assert_eq!(cloud.count("listener"), 1);
        match cloud.resource(&env.load_balancer_arn).unwrap() {
            CloudResource::LoadBalancer { subnet_ids, .. } => {
                assert_eq!(subnet_ids, env.public_subnet_ids().to_vec());
            }
            other => panic!("unexpected resource {:?}", other),
        }

        let message = client
            .start_instance_attachment(InstanceArgs {
                security_group_id: env.security_group_id.clone(),
                subnet_id: env.subnet_ids[0].clone(),
                target_group_arn: env.target_group_arn.clone(),
            })
            .await
            .unwrap();
        let instance_id = message
            .strip_prefix("Instance successfully created: ")
            .unwrap()
            .to_string();
        assert_eq!(cloud.targets(&env.target_group_arn), vec![instance_id.clone()]);

        let handle = client
            .start_teardown(TeardownArgs::new(&instance_id))
            .await
            .unwrap();
        client.approve_teardown(handle.workflow_id()).unwrap();
        handle.result().await.unwrap();

        assert_eq!(cloud.instance_state(&instance_id), Some(InstanceState::Terminated));
        assert!(cloud.targets(&env.target_group_arn).is_empty());
    }

    #[tokio::test]
    async fn test_security_group_ingress() {
        let cloud = InMemoryCloud::default();
        let vpc = cloud.create_vpc("dev").await.unwrap();
        let sg = cloud.create_security_group("dev", &vpc).await.unwrap();

        match cloud.resource(&sg).unwrap() {
            CloudResource::SecurityGroup { ingress, .. } => {
                let cidrs: Vec<&str> = ingress.iter().map(|r| r.cidr.as_str()).collect();
                assert_eq!(cidrs, vec!["172.1.0.0/20", "0.0.0.0/0"]);
                assert!(ingress.iter().all(|r| r.port == 80 && r.protocol == "tcp"));
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_references_are_enforced() {
        let cloud = InMemoryCloud::default();
        let spec = SubnetCatalog::default().entries()[0].clone();

        let error = cloud.create_subnet("vpc-missing", &spec).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);

        let vpc = cloud.create_vpc("dev").await.unwrap();
        cloud.create_subnet(&vpc, &spec).await.unwrap();
        let conflict = cloud.create_subnet(&vpc, &spec).await.unwrap_err();
        assert_eq!(conflict.kind, ErrorKind::InvalidRequest);

        assert!(cloud.create_listener("arn:missing", "arn:missing").await.is_err());
        assert!(cloud.delete_instance("i-missing").await.is_err());
    }

    #[tokio::test]
    async fn test_load_balancer_needs_two_zones() {
        let cloud = InMemoryCloud::default();
        let vpc = cloud.create_vpc("dev").await.unwrap();
        let sg = cloud.create_security_group("dev", &vpc).await.unwrap();
        let catalog = SubnetCatalog::default();

        // us-west-2a public and private
        let a = cloud.create_subnet(&vpc, &catalog.entries()[0]).await.unwrap();
        let c = cloud.create_subnet(&vpc, &catalog.entries()[2]).await.unwrap();
        let error = cloud
            .create_load_balancer("dev", &sg, &[a.clone(), c])
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);

        let b = cloud.create_subnet(&vpc, &catalog.entries()[1]).await.unwrap();
        let arn = cloud
            .create_load_balancer("dev", &sg, &[a.clone(), b.clone()])
            .await
            .unwrap();
        assert!(arn.starts_with("arn:aws:elasticloadbalancing:us-west-2:"));

        // Same request again returns the same load balancer
        let again = cloud.create_load_balancer("dev", &sg, &[a, b]).await.unwrap();
        assert_eq!(arn, again);
    }

    #[tokio::test]
    async fn test_instance_boots_after_polls() {
        let cloud = InMemoryCloud::new(CloudSettings {
            boot_polls: 2,
            ..CloudSettings::default()
        });
        let vpc = cloud.create_vpc("dev").await.unwrap();
        let sg = cloud.create_security_group("dev", &vpc).await.unwrap();
        let subnet = cloud
            .create_subnet(&vpc, &SubnetCatalog::default().entries()[0])
            .await
            .unwrap();
        let instance = cloud.create_instance(&sg, &subnet).await.unwrap();
        let tg = cloud.create_target_group(&vpc).await.unwrap();

        // Not running yet, so it can't be registered
        let error = cloud.register_instance(&instance, &tg).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);

        assert_eq!(cloud.get_instance_state(&instance).await.unwrap(), InstanceState::Pending);
        assert_eq!(cloud.get_instance_state(&instance).await.unwrap(), InstanceState::Pending);
        assert_eq!(cloud.get_instance_state(&instance).await.unwrap(), InstanceState::Running);

        cloud.register_instance(&instance, &tg).await.unwrap();
        assert_eq!(cloud.targets(&tg), vec![instance]);
    }
}
