// Infra Provisioner - Command Line Client
// Talks to a running provisioner-server over its JSON API

//! # Provisioner CLI
//!
//! Starts workflows, approves teardowns and shows execution status against a
//! running `provisioner-server`.
//!
//! ```text
//! provisioner provision --env dev
//! provisioner attach --security-group-id sg-1 --subnet-id subnet-1 --target-group-arn arn:...
//! provisioner teardown --instance-id i-0abc
//! provisioner approve teardown-i-0abc
//! provisioner status [workflow-id]
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use infra_provisioner::server::handlers::{AcceptedResponse, ErrorResponse, MessageResponse};
use infra_provisioner::{EnvironmentOutput, WorkflowExecution, WorkflowKind};

#[derive(Parser)]
#[command(name = "provisioner")]
#[command(about = "Infra Provisioner CLI - provision, extend and tear down environments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provisioner server URL
    #[arg(long, env = "PROVISIONER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a complete environment
    Provision {
        /// Environment name used for tags and resource names
        #[arg(long)]
        env: String,

        /// Explicit workflow id
        #[arg(long)]
        workflow_id: Option<String>,
    },

    /// Launch an instance and register it with a target group
    Attach {
        #[arg(long)]
        security_group_id: String,

        #[arg(long)]
        subnet_id: String,

        #[arg(long)]
        target_group_arn: String,

        /// Explicit workflow id
        #[arg(long)]
        workflow_id: Option<String>,
    },

    /// Start a teardown that waits for approval
    Teardown {
        #[arg(long)]
        instance_id: String,

        /// Explicit workflow id
        #[arg(long)]
        workflow_id: Option<String>,
    },

    /// Approve a waiting teardown
    Approve {
        workflow_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show one execution, or list executions
    Status {
        workflow_id: Option<String>,

        /// Only list executions of this kind
        #[arg(long, value_parser = parse_kind)]
        kind: Option<WorkflowKind>,
    },

    /// Cancel a running execution
    Cancel { workflow_id: String },
}

fn parse_kind(value: &str) -> std::result::Result<WorkflowKind, String> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| "expected provisioning, instance-attachment or teardown".to_string())
}

struct ApiClient {
    client: Client,
    server_url: String,
}

impl ApiClient {
    fn new(server_url: &str) -> Self {
        Self {
            client: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.server_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();

        debug!(%method, %url, status = status.as_u16(), "request completed");

        if status.is_success() {
            return response.json::<T>().await.context("Failed to decode response");
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(error) => match error.step {
                Some(step) => bail!("{} ({}, step {})", error.error, status, step),
                None => bail!("{} ({})", error.error, status),
            },
            Err(_) => bail!("{}: {}", status, text),
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠁", "⠂", "⠄", "⡀", "⢀", "⠠", "⠐", "⠈", "⠁"])
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_execution(execution: &WorkflowExecution) {
    println!("{} {}", "Workflow:".bold(), execution.id);
    println!("  Kind:    {}", execution.kind);
    let status = format!("{:?}", execution.status).to_lowercase();
    let status = match status.as_str() {
        "completed" => status.green(),
        "running" => status.yellow(),
        _ => status.red(),
    };
    println!("  Status:  {}", status);
    if let Some(step) = &execution.current_step {
        println!("  Step:    {}", step);
    }
    println!("  Started: {}", execution.started_at);
    if let Some(completed) = &execution.completed_at {
        println!("  Ended:   {}", completed);
    }
    if let Some(result) = &execution.result {
        println!("  Result:  {}", result);
    }
    if let Some(error) = &execution.error {
        println!("  Error:   {}", error.red());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let api = ApiClient::new(&cli.server);

    match cli.command {
        Commands::Provision { env, workflow_id } => {
            let pb = spinner(&format!("Provisioning environment {}...", env));
            let result: Result<EnvironmentOutput> = api
                .request(
                    Method::POST,
                    "/workflows/provisioning",
                    Some(json!({ "env": env, "workflowId": workflow_id })),
                )
                .await;
            pb.finish_and_clear();
            let output = result?;

            println!("{}", "Environment provisioned!".green().bold());
            println!("  VPC:            {}", output.vpc_id);
            println!("  Subnets:        {}", output.subnet_ids.join(", "));
            println!("  Security group: {}", output.security_group_id);
            println!("  Load balancer:  {}", output.load_balancer_arn);
            println!("  Target group:   {}", output.target_group_arn);
        }

        Commands::Attach {
            security_group_id,
            subnet_id,
            target_group_arn,
            workflow_id,
        } => {
            let pb = spinner("Launching instance and waiting for it to run...");
            let result: Result<MessageResponse> = api
                .request(
                    Method::POST,
                    "/workflows/instance-attachment",
                    Some(json!({
                        "securityGroupId": security_group_id,
                        "subnetId": subnet_id,
                        "targetGroupArn": target_group_arn,
                        "workflowId": workflow_id,
                    })),
                )
                .await;
            pb.finish_and_clear();
            println!("{}", result?.message.green());
        }

        Commands::Teardown {
            instance_id,
            workflow_id,
        } => {
            let accepted: AcceptedResponse = api
                .request(
                    Method::POST,
                    "/workflows/teardown",
                    Some(json!({ "instanceId": instance_id, "workflowId": workflow_id })),
                )
                .await?;
            println!(
                "{} {}",
                "Teardown waiting for approval:".yellow(),
                accepted.workflow_id.bold()
            );
            println!("Approve with: provisioner approve {}", accepted.workflow_id);
        }

        Commands::Approve { workflow_id, yes } => {
            if !yes {
                let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt(format!("Delete the instance of {}?", workflow_id))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("{}", "Aborted".yellow());
                    return Ok(());
                }
            }

            let accepted: AcceptedResponse = api
                .request(
                    Method::POST,
                    &format!("/workflows/{}/signals/approve-teardown", workflow_id),
                    None,
                )
                .await?;
            println!("{} {}", "Teardown approved:".green(), accepted.workflow_id);
        }

        Commands::Status { workflow_id, kind } => match workflow_id {
            Some(id) => {
                let execution: WorkflowExecution = api
                    .request(Method::GET, &format!("/workflows/{}", id), None)
                    .await?;
                print_execution(&execution);
            }
            None => {
                let path = match kind {
                    Some(kind) => format!("/workflows?kind={}", kind),
                    None => "/workflows".to_string(),
                };
                let executions: Vec<WorkflowExecution> =
                    api.request(Method::GET, &path, None).await?;

                println!("{}", format!("Executions ({})", executions.len()).bold());
                if executions.is_empty() {
                    println!("No executions found.");
                }
                for execution in &executions {
                    print_execution(execution);
                    println!();
                }
            }
        },

        Commands::Cancel { workflow_id } => {
            let accepted: AcceptedResponse = api
                .request(
                    Method::POST,
                    &format!("/workflows/{}/cancel", workflow_id),
                    None,
                )
                .await?;
            println!("{} {}", "Cancellation requested:".yellow(), accepted.workflow_id);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays clean
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
