use crate::error::ApiError;
use crate::profile::threshold::{MAX_THRESHOLD, MIN_THRESHOLD};
use crate::profile::Committed;
use crate::state::FaceServiceState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::face::{
    AddSampleRequest, ConsistencyRequest, EnrollRequest, EventListResponse, Identity,
    IdentityListResponse, IdentityResponse, RenameRequest, ThresholdRequest, ThresholdResponse,
    VideoFrame,
};
use common::validation::parse_uuid;
use serde_json::json;

type ApiResult<T> = Result<T, ApiError>;

fn identity_response(committed: Committed<Identity>) -> IdentityResponse {
    let warning = committed.warning_message();
    IdentityResponse {
        identity: committed.value,
        warning,
    }
}

// ============================================================================
// Health
// ============================================================================

/// Health check endpoint
pub async fn healthz(State(state): State<FaceServiceState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "face-service",
            "node_id": state.node_id(),
        })),
    )
}

/// Ready once the extractor has loaded its models
pub async fn readyz(State(state): State<FaceServiceState>) -> impl IntoResponse {
    let extractor = state.extractor_status();

    if state.health_check().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "extractor": extractor
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "extractor": extractor
            })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

// ============================================================================
// Extractor
// ============================================================================

pub async fn extractor_status(State(state): State<FaceServiceState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.extractor_status()))
}

/// Retry loading the extractor after a failure
pub async fn retry_extractor(
    State(state): State<FaceServiceState>,
) -> ApiResult<impl IntoResponse> {
    let status = state.retry_extractor().await?;
    Ok((StatusCode::OK, Json(status)))
}

// ============================================================================
// Identities
// ============================================================================

pub async fn list_identities(State(state): State<FaceServiceState>) -> impl IntoResponse {
    let identities = state.list_identities().await;
    (StatusCode::OK, Json(IdentityListResponse { identities }))
}

pub async fn get_identity(
    State(state): State<FaceServiceState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let identity = state.get_identity(id).await?;
    Ok((StatusCode::OK, Json(identity)))
}

/// Enroll a new identity from a vector or a captured frame
pub async fn enroll(
    State(state): State<FaceServiceState>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<impl IntoResponse> {
    let committed = state.enroll(request).await?;
    Ok((StatusCode::CREATED, Json(identity_response(committed))))
}

pub async fn rename_identity(
    State(state): State<FaceServiceState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let committed = state.rename(id, request.name).await?;
    Ok((StatusCode::OK, Json(identity_response(committed))))
}

pub async fn delete_identity(
    State(state): State<FaceServiceState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let committed = state.delete_identity(id).await?;
    Ok((StatusCode::OK, Json(identity_response(committed))))
}

pub async fn add_sample(
    State(state): State<FaceServiceState>,
    Path(id): Path<String>,
    Json(request): Json<AddSampleRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let committed = state.add_sample(id, request).await?;
    Ok((StatusCode::CREATED, Json(identity_response(committed))))
}

pub async fn remove_sample(
    State(state): State<FaceServiceState>,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let committed = state.remove_sample(id, index).await?;
    Ok((StatusCode::OK, Json(identity_response(committed))))
}

pub async fn check_consistency(
    State(state): State<FaceServiceState>,
    Path(id): Path<String>,
    Json(request): Json<ConsistencyRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_uuid(&id, "identity id")?;
    let response = state.check_consistency(id, request).await?;
    Ok((StatusCode::OK, Json(response)))
}

// ============================================================================
// Threshold
// ============================================================================

pub async fn get_threshold(State(state): State<FaceServiceState>) -> impl IntoResponse {
    let threshold = state.threshold().await;
    (
        StatusCode::OK,
        Json(ThresholdResponse {
            threshold: threshold.value(),
            min: MIN_THRESHOLD,
            max: MAX_THRESHOLD,
            warning: None,
        }),
    )
}

pub async fn set_threshold(
    State(state): State<FaceServiceState>,
    Json(request): Json<ThresholdRequest>,
) -> ApiResult<impl IntoResponse> {
    let committed = state.set_threshold(request.threshold).await?;
    let warning = committed.warning_message();
    Ok((
        StatusCode::OK,
        Json(ThresholdResponse {
            threshold: committed.value.value(),
            min: MIN_THRESHOLD,
            max: MAX_THRESHOLD,
            warning,
        }),
    ))
}

// ============================================================================
// Recognition
// ============================================================================

/// Run one recognition tick on the submitted frame
pub async fn recognize(
    State(state): State<FaceServiceState>,
    Json(frame): Json<VideoFrame>,
) -> ApiResult<impl IntoResponse> {
    let response = state.recognize(frame).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Hand a frame to the monitor loop
pub async fn publish_frame(
    State(state): State<FaceServiceState>,
    Json(frame): Json<VideoFrame>,
) -> impl IntoResponse {
    let sequence = frame.sequence;
    state.publish_frame(frame);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "sequence": sequence })),
    )
}

pub async fn monitor_status(State(state): State<FaceServiceState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.monitor_status().await))
}

// ============================================================================
// Events
// ============================================================================

pub async fn list_events(State(state): State<FaceServiceState>) -> impl IntoResponse {
    let events = state.events().await;
    (StatusCode::OK, Json(EventListResponse { events }))
}

pub async fn recent_events(State(state): State<FaceServiceState>) -> impl IntoResponse {
    let events = state.recent_events().await;
    (StatusCode::OK, Json(EventListResponse { events }))
}

pub async fn analytics(State(state): State<FaceServiceState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.analytics().await))
}
