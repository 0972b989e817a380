//! Scheduler HTTP surface
//!
//! - `GET /health`
//! - `GET /v1/status`: capacity per host and totals
//! - `GET /v1/services`: the service catalog
//! - `GET|POST /v1/instances`: list rows / deploy `{service}`
//! - `DELETE /v1/instances/{key}`: stop
//! - `GET /v1/instances/{key}/test`: wait for the reporter's result
//! - `GET /v1/flows`: every tracked rule

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServiceDefinition;
use crate::lifecycle::{CapacityReport, FlowRow, InstanceRow, LifecycleError, ServiceKey};
use crate::placement::PlacementError;
use crate::server::state::AppState;

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/services", get(list_services))
        .route("/v1/instances", get(list_instances).post(deploy_instance))
        .route("/v1/instances/{key}", axum::routing::delete(stop_instance))
        .route("/v1/instances/{key}/test", get(test_instance))
        .route("/v1/flows", get(list_flows))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<ServiceKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<ServiceKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backfilled: Vec<ServiceKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeployResponse {
    fn error(reason: String) -> Self {
        Self {
            success: false,
            service_key: None,
            evicted: Vec::new(),
            backfilled: Vec::new(),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub freed_slots: usize,
    #[serde(default)]
    pub removed_flows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResponse {
    fn error(error: String) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub dry_run: bool,
    pub uptime_secs: i64,
    pub capacity: CapacityReport,
}

fn error_status(error: &LifecycleError) -> StatusCode {
    match error {
        LifecycleError::UnknownService(_) | LifecycleError::UnknownInstance(_) => {
            StatusCode::NOT_FOUND
        }
        LifecycleError::Placement(PlacementError::Insufficient { .. }) => StatusCode::CONFLICT,
        LifecycleError::NoReporter(_) => StatusCode::BAD_REQUEST,
        LifecycleError::ReadinessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let capacity = state.controller.lock().await.capacity();
    Json(StatusResponse {
        status: "ok".to_string(),
        dry_run: state.dry_run,
        uptime_secs: state.uptime_secs(),
        capacity,
    })
}

async fn list_services(State(state): State<AppState>) -> impl IntoResponse {
    let services: Vec<ServiceDefinition> =
        state.controller.lock().await.catalog().services.clone();
    Json(services)
}

async fn list_instances(State(state): State<AppState>) -> impl IntoResponse {
    let rows: Vec<InstanceRow> = state.controller.lock().await.list_instances();
    Json(rows)
}

async fn list_flows(State(state): State<AppState>) -> impl IntoResponse {
    let rows: Vec<FlowRow> = state.controller.lock().await.list_flows();
    Json(rows)
}

async fn deploy_instance(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> impl IntoResponse {
    let result = state.controller.lock().await.deploy(&request.service).await;
    match result {
        Ok(outcome) => {
            info!("Deployed {} via API", outcome.service_key);
            (
                StatusCode::CREATED,
                Json(DeployResponse {
                    success: true,
                    service_key: Some(outcome.service_key),
                    evicted: outcome.evicted,
                    backfilled: outcome.backfilled,
                    reason: None,
                }),
            )
        }
        Err(e) => {
            warn!("Deploy of {} failed: {}", request.service, e);
            (error_status(&e), Json(DeployResponse::error(e.to_string())))
        }
    }
}

async fn stop_instance(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let key = ServiceKey::from(key.as_str());
    let result = state.controller.lock().await.stop(&key).await;
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(OperationStatus {
                success: true,
                reason: None,
                freed_slots: outcome.freed_slots,
                removed_flows: outcome.removed_flows,
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(OperationStatus {
                success: false,
                reason: Some(e.to_string()),
                freed_slots: 0,
                removed_flows: 0,
            }),
        ),
    }
}

/// Polls outside the controller lock so deploys and stops are not blocked
async fn test_instance(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let key = ServiceKey::from(key.as_str());
    let probe = state.controller.lock().await.test_probe(&key);
    let probe = match probe {
        Ok(probe) => probe,
        Err(e) => return (error_status(&e), Json(TestResponse::error(e.to_string()))),
    };

    match probe.wait_stable().await {
        Ok(content) => (
            StatusCode::OK,
            Json(TestResponse {
                success: true,
                content: Some(content),
                error: None,
            }),
        ),
        Err(source) => {
            let e = LifecycleError::ReadinessTimeout {
                service_key: key,
                source,
            };
            (error_status(&e), Json(TestResponse::error(e.to_string())))
        }
    }
}
