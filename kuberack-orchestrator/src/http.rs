use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use kuberack_common::ProvisionError;
use serde::Deserialize;
use serde_json::json;

use crate::workflow::{ProvisionOutcome, ProvisioningWorkflow};

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<ProvisioningWorkflow>,
}

#[derive(Deserialize, Debug)]
pub struct ProvisionRequest {
    pub identity: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/provision", post(provision))
        .with_state(state)
}

async fn root() -> &'static str {
    "kuberack orchestrator online"
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// HTTP status for a failed run, chosen by the underlying cause.
pub fn status_for(err: &ProvisionError) -> StatusCode {
    match err.root() {
        ProvisionError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        ProvisionError::OperationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ProvisionError::RecordStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProvisionError::OperationFailed { .. }
        | ProvisionError::AddressResolutionFailed { .. }
        | ProvisionError::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> Response {
    // The run owns its own task: a dropped connection must not cancel a
    // provisioning that already claimed the record.
    let workflow = state.workflow.clone();
    let identity = req.identity.clone();
    let run = tokio::spawn(async move { workflow.provision(&identity).await });
    let result = match run.await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(identity = %req.identity, error = %join_err, "provision task aborted");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "failed",
                    "error": "PROVISION_TASK_ABORTED",
                    "message": join_err.to_string(),
                })),
            )
                .into_response();
        }
    };

    match result {
        Ok(ProvisionOutcome::Provisioned(report)) => (
            StatusCode::OK,
            Json(json!({ "status": "provisioned", "lab": report })),
        )
            .into_response(),
        Ok(ProvisionOutcome::AlreadyProvisioned) => (
            StatusCode::OK,
            Json(json!({ "status": "already_provisioned", "identity": req.identity.trim() })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(identity = %req.identity, error_code = err.root().code(), error = %err, "provision request failed");
            (
                status_for(&err),
                Json(json!({
                    "status": "failed",
                    "error": err.root().code(),
                    "step": err.step().map(|s| s.as_str()),
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}
