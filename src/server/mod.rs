// Provisioner HTTP Server
// Exposes the workflow client to other processes over a small JSON API

//! # Provisioner Server Module
//!
//! The server layer sits on top of the engine and lets separate processes
//! start workflows, approve teardowns and query execution status.
//!
//! ## Server Architecture
//!
//! ```text
//! Client (provisioner CLI, curl, ...)
//!        ↓ HTTP/JSON
//! Server Layer (this module) ← routes, error mapping
//!        ↓ Function calls
//! Engine Layer ← WorkflowClient, workflows, activities
//! ```
//!
//! ## Routes
//!
//! | Method | Path | Result |
//! |---|---|---|
//! | POST | `/workflows/provisioning` | 200 with the environment ids |
//! | POST | `/workflows/instance-attachment` | 200 with a message |
//! | POST | `/workflows/teardown` | 202 with the workflow id |
//! | POST | `/workflows/:id/signals/approve-teardown` | 202, or 404 if not running |
//! | POST | `/workflows/:id/cancel` | 202, or 404 if not running |
//! | GET | `/workflows` | execution records, `?kind=` filters |
//! | GET | `/workflows/:id` | one execution record |
//! | GET | `/health` | liveness |
//!
//! Errors are JSON `{"error", "kind", "step"}` bodies: 400 for bad input, 404
//! for unknown workflows, 409 for a workflow id that is already running, 504
//! when a timer or deadline ran out and 502 for every other remote failure.
//!
//! ## Rust Learning Notes:
//!
//! ### Axum State
//! `Router::with_state(client)` hands a clone of the `WorkflowClient` to every
//! handler through the `State` extractor. Cloning is cheap because the client
//! only holds `Arc`s.

pub mod handlers;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ServerSettings;
use crate::engine::client::WorkflowClient;
use handlers::{
    approve_teardown, cancel_workflow, get_workflow, health_check, list_workflows, not_found,
    start_instance_attachment, start_provisioning, start_teardown,
};

/// HTTP server configuration
#[derive(Clone, Debug)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

impl From<&ServerSettings> for HttpServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            cors_enabled: settings.cors_enabled,
        }
    }
}

pub struct HttpServer {
    config: HttpServerConfig,
    client: WorkflowClient,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, client: WorkflowClient) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Create the Axum router with every workflow route
    pub fn create_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/workflows", get(list_workflows))
            .route("/workflows/provisioning", post(start_provisioning))
            .route("/workflows/instance-attachment", post(start_instance_attachment))
            .route("/workflows/teardown", post(start_teardown))
            .route("/workflows/:id", get(get_workflow))
            .route("/workflows/:id/cancel", post(cancel_workflow))
            .route(
                "/workflows/:id/signals/approve-teardown",
                post(approve_teardown),
            )
            .fallback(not_found)
            .with_state(self.client.clone());

        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        info!("🚀 Provisioner API listening on http://{}", addr);
        info!("   POST http://{}/workflows/provisioning", addr);
        info!("   POST http://{}/workflows/instance-attachment", addr);
        info!("   POST http://{}/workflows/teardown", addr);
        info!("   POST http://{}/workflows/:id/signals/approve-teardown", addr);
        info!("   GET  http://{}/workflows", addr);
        info!("   CORS enabled: {}", self.config.cors_enabled);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Provisioner API stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Builder pattern for the HTTP server
pub struct HttpServerBuilder {
    config: HttpServerConfig,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpServerConfig::default(),
        }
    }

    pub fn with_settings(mut self, settings: &ServerSettings) -> Self {
        self.config = HttpServerConfig::from(settings);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn build(self, client: WorkflowClient) -> HttpServer {
        HttpServer::new(self.config, client)
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
