// Workflow steps - the named states each workflow moves through
//
// ## Step Model Overview
//
// Every workflow is a small state machine. Executions move forward through
// named steps and stop at the first failure:
//
// ```
// provisioning:  start -> create_vpc -> create_subnets -> create_gateway
//                -> create_route_table -> add_route -> associate_route_table
//                -> create_security_group -> create_load_balancer
//                -> create_target_group -> create_listener -> done
//
// attachment:    create_instance -> poll_until_running -> register_instance -> done
//
// teardown:      awaiting_approval -> approved -> deleting -> done
//                awaiting_approval -> timed_out
// ```
//
// Step names are recorded in each execution's history and appear in error
// messages, so they are stable snake_case strings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    Start,
    CreateVpc,
    CreateSubnets,
    CreateGateway,
    CreateRouteTable,
    AddRoute,
    AssociateRouteTable,
    CreateSecurityGroup,
    CreateLoadBalancer,
    CreateTargetGroup,
    CreateListener,
    Done,
}

impl ProvisioningStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStep::Start => "start",
            ProvisioningStep::CreateVpc => "create_vpc",
            ProvisioningStep::CreateSubnets => "create_subnets",
            ProvisioningStep::CreateGateway => "create_gateway",
            ProvisioningStep::CreateRouteTable => "create_route_table",
            ProvisioningStep::AddRoute => "add_route",
            ProvisioningStep::AssociateRouteTable => "associate_route_table",
            ProvisioningStep::CreateSecurityGroup => "create_security_group",
            ProvisioningStep::CreateLoadBalancer => "create_load_balancer",
            ProvisioningStep::CreateTargetGroup => "create_target_group",
            ProvisioningStep::CreateListener => "create_listener",
            ProvisioningStep::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStep {
    CreateInstance,
    PollUntilRunning,
    RegisterInstance,
    Done,
}

impl AttachmentStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentStep::CreateInstance => "create_instance",
            AttachmentStep::PollUntilRunning => "poll_until_running",
            AttachmentStep::RegisterInstance => "register_instance",
            AttachmentStep::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    AwaitingApproval,
    Approved,
    Deleting,
    Done,
    TimedOut,
}

impl TeardownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::AwaitingApproval => "awaiting_approval",
            TeardownStep::Approved => "approved",
            TeardownStep::Deleting => "deleting",
            TeardownStep::Done => "done",
            TeardownStep::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for AttachmentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
