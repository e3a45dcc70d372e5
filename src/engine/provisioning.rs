// Provisioning workflow - builds the network and load balancer of an environment

//! # Provisioning Workflow
//!
//! Builds one environment as an ordered chain of activities, each depending on
//! identifiers produced by the ones before it:
//!
//! ```text
//! start -> create_vpc -> create_subnets -> create_gateway -> create_route_table
//!   -> add_route -> associate_route_table -> create_security_group
//!   -> create_load_balancer -> create_target_group -> create_listener -> done
//! ```
//!
//! Subnets are created concurrently, one per catalog entry, and their ids are
//! kept in catalog order whatever order the calls finish in. Only the public
//! pair (the first two catalog entries) is associated with the route table and
//! handed to the load balancer.
//!
//! Any failure ends the run, wrapped in `StepFailed` with the step name.
//! Resources created before the failure are left in place.
//!
//! ## Rust Learning Notes:
//!
//! ### try_join_all
//! `futures::future::try_join_all` drives a list of futures concurrently and
//! resolves to a `Vec` of their outputs **in input order**, or to the first
//! error. Dropping the remaining futures on error is what makes the fan-out
//! fail fast.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;

use super::activities::ResourceActivities;
use super::context::WorkflowContext;
use super::retry::ActivityProxy;
use super::workflow::Workflow;
use crate::models::{
    EnvironmentArgs, EnvironmentOutput, ProvisioningStep, RetryPolicy, SubnetCatalog,
    WorkflowKind, PUBLIC_SUBNET_COUNT,
};
use crate::{ProvisionerError, Result};

pub struct ProvisioningWorkflow {
    activities: Arc<dyn ResourceActivities>,
    policy: RetryPolicy,
    catalog: SubnetCatalog,
}

impl ProvisioningWorkflow {
    pub fn new(
        activities: Arc<dyn ResourceActivities>,
        policy: RetryPolicy,
        catalog: SubnetCatalog,
    ) -> Self {
        Self {
            activities,
            policy,
            catalog,
        }
    }

    pub fn catalog(&self) -> &SubnetCatalog {
        &self.catalog
    }
}

/// Reject an empty identifier returned by `step`
fn require_id(step: ProvisioningStep, id: String) -> Result<String> {
    if id.trim().is_empty() {
        Err(ProvisionerError::EmptyResult {
            step: step.as_str().to_string(),
        })
    } else {
        Ok(id)
    }
}

/// Run one step: record it, then map any failure to `StepFailed`
async fn step<T, Fut>(ctx: &WorkflowContext, step: ProvisioningStep, fut: Fut) -> Result<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    ctx.enter_step(step.as_str()).await;
    fut.await.map_err(|e| e.in_step(step.as_str()))
}

#[async_trait::async_trait]
impl Workflow for ProvisioningWorkflow {
    type Input = EnvironmentArgs;
    type Output = EnvironmentOutput;

    const KIND: WorkflowKind = WorkflowKind::Provisioning;

    async fn run(&self, ctx: &WorkflowContext, input: EnvironmentArgs) -> Result<EnvironmentOutput> {
        ctx.enter_step(ProvisioningStep::Start.as_str()).await;
        let env = input.validate()?;

        let proxy = ActivityProxy::new(
            self.activities.clone(),
            self.policy.clone(),
            ctx.cancellation().clone(),
        );
        info!(workflow_id = ctx.workflow_id(), env, "provisioning environment");

        let vpc_id = step(ctx, ProvisioningStep::CreateVpc, async {
            require_id(ProvisioningStep::CreateVpc, proxy.create_vpc(env).await?)
        })
        .await?;

        let subnet_ids = step(ctx, ProvisioningStep::CreateSubnets, async {
            let ids = try_join_all(
                self.catalog
                    .iter()
                    .map(|subnet| proxy.create_subnet(&vpc_id, subnet)),
            )
            .await?;
            ids.into_iter()
                .map(|id| require_id(ProvisioningStep::CreateSubnets, id))
                .collect::<Result<Vec<_>>>()
        })
        .await?;

        let gateway_id = step(ctx, ProvisioningStep::CreateGateway, async {
            require_id(
                ProvisioningStep::CreateGateway,
                proxy.create_gateway(&vpc_id, env).await?,
            )
        })
        .await?;

        let route_table_id = step(ctx, ProvisioningStep::CreateRouteTable, async {
            require_id(
                ProvisioningStep::CreateRouteTable,
                proxy.create_route_table(&vpc_id).await?,
            )
        })
        .await?;

        step(
            ctx,
            ProvisioningStep::AddRoute,
            proxy.add_route(&route_table_id, &gateway_id),
        )
        .await?;

        let public_subnets = &subnet_ids[..PUBLIC_SUBNET_COUNT];
        step(ctx, ProvisioningStep::AssociateRouteTable, async {
            try_join_all(
                public_subnets
                    .iter()
                    .map(|subnet_id| proxy.associate_route_table(&route_table_id, subnet_id)),
            )
            .await
            .map(|_| ())
        })
        .await?;

        let security_group_id = step(ctx, ProvisioningStep::CreateSecurityGroup, async {
            require_id(
                ProvisioningStep::CreateSecurityGroup,
                proxy.create_security_group(env, &vpc_id).await?,
            )
        })
        .await?;

        let load_balancer_arn = step(ctx, ProvisioningStep::CreateLoadBalancer, async {
            require_id(
                ProvisioningStep::CreateLoadBalancer,
                proxy
                    .create_load_balancer(env, &security_group_id, public_subnets)
                    .await?,
            )
        })
        .await?;

        let target_group_arn = step(ctx, ProvisioningStep::CreateTargetGroup, async {
            require_id(
                ProvisioningStep::CreateTargetGroup,
                proxy.create_target_group(&vpc_id).await?,
            )
        })
        .await?;

        step(
            ctx,
            ProvisioningStep::CreateListener,
            proxy.create_listener(&load_balancer_arn, &target_group_arn),
        )
        .await?;

        ctx.enter_step(ProvisioningStep::Done.as_str()).await;
        info!(workflow_id = ctx.workflow_id(), env, %vpc_id, "environment provisioned");

        Ok(EnvironmentOutput {
            vpc_id,
            load_balancer_arn,
            security_group_id,
            subnet_ids,
            target_group_arn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::activities::{names, ActivityError};
    use crate::engine::storage::InMemoryExecutionStorage;
    use crate::engine::testing::{fast_policy, ScriptedActivities};
    use crate::models::SubnetSpec;
    use crate::ErrorKind;
    use std::time::Duration;
    use tokio::time::Instant;

    fn setup() -> (Arc<ScriptedActivities>, ProvisioningWorkflow, WorkflowContext) {
        let activities = Arc::new(ScriptedActivities::new());
        let workflow =
            ProvisioningWorkflow::new(activities.clone(), fast_policy(), SubnetCatalog::default());
        let (ctx, _control) = WorkflowContext::new(
            "provision-dev",
            WorkflowKind::Provisioning,
            Arc::new(InMemoryExecutionStorage::new()),
        );
        (activities, workflow, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisions_full_environment() {
        let (activities, workflow, ctx) = setup();

        let output = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap();

        assert_eq!(output.vpc_id, "vpc-dev");
        assert_eq!(
            output.subnet_ids,
            vec![
                "subnet-us-west-2a-public",
                "subnet-us-west-2b-public",
                "subnet-us-west-2a-private",
                "subnet-us-west-2b-private",
            ]
        );
        assert_eq!(output.security_group_id, "sg-dev");
        assert_eq!(output.load_balancer_arn, "arn:lb/dev");
        assert_eq!(output.target_group_arn, "arn:tg/vpc-dev");

        // Route table associated with exactly the public pair
        let associations = activities.calls_to(names::ASSOCIATE_ROUTE_TABLE);
        assert_eq!(associations.len(), 2);
        let mut associated: Vec<&str> = associations.iter().map(|c| c.args[1].as_str()).collect();
        associated.sort();
        assert_eq!(associated, vec!["subnet-us-west-2a-public", "subnet-us-west-2b-public"]);

        // Load balancer gets (env, sg, public pair)
        let lb = &activities.calls_to(names::CREATE_LOAD_BALANCER)[0];
        assert_eq!(
            lb.args,
            vec!["dev", "sg-dev", "subnet-us-west-2a-public", "subnet-us-west-2b-public"]
        );

        let listener = &activities.calls_to(names::CREATE_LISTENER)[0];
        assert_eq!(listener.args, vec!["arn:lb/dev", "arn:tg/vpc-dev"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_dependency_order() {
        let (activities, workflow, ctx) = setup();
        workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap();

        let mut order = activities.activity_order();
        order.dedup();
        assert_eq!(
            order,
            vec![
                names::CREATE_VPC,
                names::CREATE_SUBNET,
                names::CREATE_GATEWAY,
                names::CREATE_ROUTE_TABLE,
                names::ADD_ROUTE,
                names::ASSOCIATE_ROUTE_TABLE,
                names::CREATE_SECURITY_GROUP,
                names::CREATE_LOAD_BALANCER,
                names::CREATE_TARGET_GROUP,
                names::CREATE_LISTENER,
            ]
        );
        assert_eq!(activities.count(names::CREATE_SUBNET), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_env_makes_no_remote_calls() {
        let (activities, workflow, ctx) = setup();

        let error = workflow.run(&ctx, EnvironmentArgs::new("")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PreconditionFailed);
        assert!(activities.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_failure_stops_before_load_balancer() {
        let (activities, workflow, ctx) = setup();
        activities.fail_always(
            names::CREATE_SUBNET,
            Some("172.1.128.0/20"),
            ActivityError::remote("InsufficientFreeAddressesInSubnet"),
        );

        let error = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap_err();

        assert_eq!(error.step(), Some("create_subnets"));
        assert_eq!(error.kind(), ErrorKind::RemoteCallFailed);
        assert_eq!(activities.count(names::CREATE_GATEWAY), 0);
        assert_eq!(activities.count(names::CREATE_LOAD_BALANCER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (activities, workflow, ctx) = setup();
        activities.fail_next(names::CREATE_VPC, 2, ActivityError::remote("RequestLimitExceeded"));

        let output = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap();

        assert_eq!(output.vpc_id, "vpc-dev");
        assert_eq!(activities.count(names::CREATE_VPC), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_load_balancer_arn_is_rejected() {
        let (activities, workflow, ctx) = setup();
        activities.return_empty(names::CREATE_LOAD_BALANCER);

        let error = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::EmptyResult);
        assert_eq!(error.step(), Some("create_load_balancer"));
        assert_eq!(activities.count(names::CREATE_TARGET_GROUP), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_target_group_arn_is_rejected() {
        let (activities, workflow, ctx) = setup();
        activities.return_empty(names::CREATE_TARGET_GROUP);

        let error = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::EmptyResult);
        assert_eq!(error.step(), Some("create_target_group"));
        assert_eq!(activities.count(names::CREATE_LISTENER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnets_are_created_concurrently() {
        let (activities, workflow, ctx) = setup();
        activities.set_latency(names::CREATE_SUBNET, None, Duration::from_secs(3));
        let started = Instant::now();

        workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap();

        // Four sequential calls would take 12s
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_failure_does_not_wait_for_siblings() {
        let (activities, workflow, ctx) = setup();
        activities.set_latency(names::CREATE_SUBNET, None, Duration::from_secs(4));
        activities.set_latency(names::CREATE_SUBNET, Some("172.1.128.0/20"), Duration::ZERO);
        activities.fail_always(
            names::CREATE_SUBNET,
            Some("172.1.128.0/20"),
            ActivityError::invalid_request("InvalidSubnet.Conflict"),
        );
        let started = Instant::now();

        let error = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap_err();

        assert_eq!(error.step(), Some("create_subnets"));
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subnet_ids_keep_catalog_order() {
        let (activities, workflow, ctx) = setup();
        // Later entries finish first
        for (cidr, secs) in [
            ("172.1.0.0/20", 4),
            ("172.1.16.0/20", 3),
            ("172.1.128.0/20", 2),
            ("172.1.144.0/20", 1),
        ] {
            activities.set_latency(names::CREATE_SUBNET, Some(cidr), Duration::from_secs(secs));
        }

        let output = workflow.run(&ctx, EnvironmentArgs::new("dev")).await.unwrap();

        assert_eq!(output.subnet_ids[0], "subnet-us-west-2a-public");
        assert_eq!(output.subnet_ids[3], "subnet-us-west-2b-private");
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_catalog_is_used() {
        let activities = Arc::new(ScriptedActivities::new());
        let catalog = SubnetCatalog::new(vec![
            SubnetSpec::new("10.0.0.0/24", "eu-west-1a", "a-public"),
            SubnetSpec::new("10.0.1.0/24", "eu-west-1b", "b-public"),
            SubnetSpec::new("10.0.2.0/24", "eu-west-1a", "a-private"),
            SubnetSpec::new("10.0.3.0/24", "eu-west-1b", "b-private"),
        ])
        .unwrap();
        let workflow = ProvisioningWorkflow::new(activities.clone(), fast_policy(), catalog);
        let (ctx, _control) = WorkflowContext::new(
            "provision-eu",
            WorkflowKind::Provisioning,
            Arc::new(InMemoryExecutionStorage::new()),
        );

        let output = workflow.run(&ctx, EnvironmentArgs::new("eu")).await.unwrap();

        assert_eq!(output.public_subnet_ids(), &["subnet-a-public", "subnet-b-public"]);
        let cidrs: Vec<String> = activities
            .calls_to(names::CREATE_SUBNET)
            .into_iter()
            .map(|c| c.args[1].clone())
            .collect();
        assert!(cidrs.contains(&"10.0.3.0/24".to_string()));
    }
}
