// Test support - a scripted activity backend that records every call

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::activities::{names, ActivityError, ResourceActivities};
use crate::models::{InstanceState, RetryPolicy, SubnetSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub activity: &'static str,
    pub args: Vec<String>,
}

struct ScriptedFailure {
    activity: &'static str,
    arg: Option<String>,
    /// `None` fails forever
    remaining: Option<u32>,
    error: ActivityError,
}

/// Activity backend whose behaviour is scripted per test
///
/// Returned identifiers are derived from the arguments (`vpc-{env}`,
/// `subnet-{tag}`, ...) so tests can assert on them directly.
pub struct ScriptedActivities {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<ScriptedFailure>>,
    empty: Mutex<HashSet<&'static str>>,
    latency: Mutex<HashMap<(&'static str, Option<String>), Duration>>,
    states: Mutex<VecDeque<InstanceState>>,
    final_state: Mutex<InstanceState>,
}

impl Default for ScriptedActivities {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            empty: Mutex::new(HashSet::new()),
            latency: Mutex::new(HashMap::new()),
            states: Mutex::new(VecDeque::new()),
            final_state: Mutex::new(InstanceState::Running),
        }
    }
}

impl ScriptedActivities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls to `activity`
    pub fn fail_next(&self, activity: &'static str, times: u32, error: ActivityError) {
        self.failures.lock().unwrap().push(ScriptedFailure {
            activity,
            arg: None,
            remaining: Some(times),
            error,
        });
    }

    /// Fail every call to `activity`, optionally only when one argument equals `arg`
    pub fn fail_always(&self, activity: &'static str, arg: Option<&str>, error: ActivityError) {
        self.failures.lock().unwrap().push(ScriptedFailure {
            activity,
            arg: arg.map(str::to_string),
            remaining: None,
            error,
        });
    }

    /// Make `activity` succeed with an empty identifier
    pub fn return_empty(&self, activity: &'static str) {
        self.empty.lock().unwrap().insert(activity);
    }

    /// Delay calls to `activity` (optionally only those with argument `arg`)
    pub fn set_latency(&self, activity: &'static str, arg: Option<&str>, delay: Duration) {
        self.latency
            .lock()
            .unwrap()
            .insert((activity, arg.map(str::to_string)), delay);
    }

    /// States reported by successive `get_instance_state` calls
    ///
    /// Once the script runs out the last state set by `settle_on` is reported.
    pub fn script_states(&self, states: impl IntoIterator<Item = InstanceState>) {
        self.states.lock().unwrap().extend(states);
    }

    pub fn settle_on(&self, state: InstanceState) {
        *self.final_state.lock().unwrap() = state;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, activity: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.activity == activity)
            .collect()
    }

    pub fn count(&self, activity: &str) -> usize {
        self.calls_to(activity).len()
    }

    pub fn activity_order(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.activity).collect()
    }

    async fn invoke(&self, activity: &'static str, args: &[&str]) -> Result<(), ActivityError> {
        self.calls.lock().unwrap().push(Call {
            activity,
            args: args.iter().map(|a| a.to_string()).collect(),
        });

        let delay = {
            let latency = self.latency.lock().unwrap();
            args.iter()
                .find_map(|a| latency.get(&(activity, Some(a.to_string()))).copied())
                .or_else(|| latency.get(&(activity, None)).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap();
        let scripted = failures.iter_mut().find(|f| {
            f.activity == activity
                && f.remaining != Some(0)
                && f.arg.as_ref().map_or(true, |arg| args.contains(&arg.as_str()))
        });
        match scripted {
            Some(failure) => {
                if let Some(remaining) = failure.remaining.as_mut() {
                    *remaining -= 1;
                }
                Err(failure.error.clone())
            }
            None => Ok(()),
        }
    }

    fn id(&self, activity: &'static str, value: String) -> String {
        if self.empty.lock().unwrap().contains(activity) {
            String::new()
        } else {
            value
        }
    }
}

#[async_trait::async_trait]
impl ResourceActivities for ScriptedActivities {
    async fn create_vpc(&self, env: &str) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_VPC, &[env]).await?;
        Ok(self.id(names::CREATE_VPC, format!("vpc-{}", env)))
    }

    async fn create_subnet(&self, vpc_id: &str, subnet: &SubnetSpec) -> Result<String, ActivityError> {
        self.invoke(
            names::CREATE_SUBNET,
            &[vpc_id, &subnet.cidr, &subnet.availability_zone, &subnet.tag],
        )
        .await?;
        Ok(self.id(names::CREATE_SUBNET, format!("subnet-{}", subnet.tag)))
    }

    async fn create_gateway(&self, vpc_id: &str, env: &str) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_GATEWAY, &[vpc_id, env]).await?;
        Ok(self.id(names::CREATE_GATEWAY, format!("igw-{}", env)))
    }

    async fn create_route_table(&self, vpc_id: &str) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_ROUTE_TABLE, &[vpc_id]).await?;
        Ok(self.id(names::CREATE_ROUTE_TABLE, "rtb-1".to_string()))
    }

    async fn add_route(&self, route_table_id: &str, gateway_id: &str) -> Result<(), ActivityError> {
        self.invoke(names::ADD_ROUTE, &[route_table_id, gateway_id]).await
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> Result<(), ActivityError> {
        self.invoke(names::ASSOCIATE_ROUTE_TABLE, &[route_table_id, subnet_id])
            .await
    }

    async fn create_security_group(&self, env: &str, vpc_id: &str) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_SECURITY_GROUP, &[env, vpc_id]).await?;
        Ok(self.id(names::CREATE_SECURITY_GROUP, format!("sg-{}", env)))
    }

    async fn create_load_balancer(
        &self,
        env: &str,
        security_group_id: &str,
        subnet_ids: &[String],
    ) -> Result<String, ActivityError> {
        let mut args = vec![env, security_group_id];
        args.extend(subnet_ids.iter().map(String::as_str));
        self.invoke(names::CREATE_LOAD_BALANCER, &args).await?;
        Ok(self.id(names::CREATE_LOAD_BALANCER, format!("arn:lb/{}", env)))
    }

    async fn create_target_group(&self, vpc_id: &str) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_TARGET_GROUP, &[vpc_id]).await?;
        Ok(self.id(names::CREATE_TARGET_GROUP, format!("arn:tg/{}", vpc_id)))
    }

    async fn create_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError> {
        self.invoke(names::CREATE_LISTENER, &[load_balancer_arn, target_group_arn])
            .await
    }

    async fn create_instance(
        &self,
        security_group_id: &str,
        subnet_id: &str,
    ) -> Result<String, ActivityError> {
        self.invoke(names::CREATE_INSTANCE, &[security_group_id, subnet_id])
            .await?;
        Ok(self.id(names::CREATE_INSTANCE, "i-1".to_string()))
    }

    async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState, ActivityError> {
        self.invoke(names::GET_INSTANCE_STATE, &[instance_id]).await?;
        let next = self.states.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| *self.final_state.lock().unwrap()))
    }

    async fn register_instance(
        &self,
        instance_id: &str,
        target_group_arn: &str,
    ) -> Result<(), ActivityError> {
        self.invoke(names::REGISTER_INSTANCE, &[instance_id, target_group_arn])
            .await
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ActivityError> {
        self.invoke(names::DELETE_INSTANCE, &[instance_id]).await
    }
}

/// Policy with short backoff so retry paths finish quickly
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(10),
        maximum_interval: Some(Duration::from_millis(100)),
        max_attempts: 3,
        per_call_timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    }
}
