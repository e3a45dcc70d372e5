// HTTP handlers for the workflow API
// Each handler translates one request into a WorkflowClient call

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::engine::client::WorkflowClient;
use crate::models::{
    EnvironmentArgs, EnvironmentOutput, InstanceArgs, TeardownArgs, WorkflowExecution, WorkflowKind,
};
use crate::{ErrorKind, ProvisionerError};

/// Body of `POST /workflows/provisioning`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    #[serde(flatten)]
    pub args: EnvironmentArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Body of `POST /workflows/instance-attachment`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    #[serde(flatten)]
    pub args: InstanceArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Body of `POST /workflows/teardown`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownRequest {
    #[serde(flatten)]
    pub args: TeardownArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Reply to requests that act on a workflow without waiting for it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub workflow_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub kind: Option<WorkflowKind>,
}

/// JSON error body: `{"error": "...", "kind": "...", "step": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// Wrapper that turns engine errors into HTTP responses
#[derive(Debug)]
pub struct ApiError(pub ProvisionerError);

impl From<ProvisionerError> for ApiError {
    fn from(err: ProvisionerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ProvisionerError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
            ProvisionerError::WorkflowAlreadyRunning(_) => StatusCode::CONFLICT,
            error => match error.kind() {
                ErrorKind::PreconditionFailed => StatusCode::BAD_REQUEST,
                ErrorKind::ApprovalTimeout | ErrorKind::PollExhausted | ErrorKind::Timeout => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind(),
            step: self.0.step().map(str::to_string),
        };
        debug!(status = status.as_u16(), error = %body.error, "request failed");
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "infra-provisioner",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// POST /workflows/provisioning - runs to completion and returns the environment
pub async fn start_provisioning(
    State(client): State<WorkflowClient>,
    Json(request): Json<ProvisionRequest>,
) -> ApiResult<Json<EnvironmentOutput>> {
    info!(env = %request.args.env, "provisioning requested");
    let output = match request.workflow_id {
        Some(id) => client.start_provisioning_with_id(id, request.args).await?,
        None => client.start_provisioning(request.args).await?,
    };
    Ok(Json(output))
}

/// POST /workflows/instance-attachment - runs to completion
pub async fn start_instance_attachment(
    State(client): State<WorkflowClient>,
    Json(request): Json<AttachRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let message = match request.workflow_id {
        Some(id) => client.start_instance_attachment_with_id(id, request.args).await?,
        None => client.start_instance_attachment(request.args).await?,
    };
    Ok(Json(MessageResponse { message }))
}

/// POST /workflows/teardown - starts the teardown and returns immediately
pub async fn start_teardown(
    State(client): State<WorkflowClient>,
    Json(request): Json<TeardownRequest>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    // A bad request must leave no execution record
    request.args.validate()?;

    let handle = match request.workflow_id {
        Some(id) => client.start_teardown_with_id(id, request.args).await?,
        None => client.start_teardown(request.args).await?,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            workflow_id: handle.workflow_id().to_string(),
            status: "awaiting_approval".to_string(),
        }),
    ))
}

/// POST /workflows/:id/signals/approve-teardown
pub async fn approve_teardown(
    State(client): State<WorkflowClient>,
    Path(workflow_id): Path<String>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    client.approve_teardown(&workflow_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            workflow_id,
            status: "approved".to_string(),
        }),
    ))
}

/// POST /workflows/:id/cancel
pub async fn cancel_workflow(
    State(client): State<WorkflowClient>,
    Path(workflow_id): Path<String>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    client.cancel(&workflow_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            workflow_id,
            status: "cancelling".to_string(),
        }),
    ))
}

/// GET /workflows[?kind=teardown]
pub async fn list_workflows(
    State(client): State<WorkflowClient>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    Ok(Json(client.list(query.kind).await?))
}

/// GET /workflows/:id
pub async fn get_workflow(
    State(client): State<WorkflowClient>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(client.describe(&workflow_id).await?))
}

/// Error handler for invalid routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "kind": "not_found" })),
    )
}
