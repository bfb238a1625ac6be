use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the identity matching engine.
///
/// `NotFound`, `IndexOutOfRange`, `DimensionMismatch` and the input errors
/// are returned to the caller of a store operation. `ExtractionFailed` and
/// `PersistenceFailed` are swallowed where they happen and only surface as
/// logs, metrics or warnings.
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("identity {0} not found")]
    NotFound(Uuid),

    #[error("sample index {index} out of range for identity {id} ({len} samples)")]
    IndexOutOfRange { id: Uuid, index: usize, len: usize },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("threshold {value} outside [{min}, {max}]")]
    InvalidThreshold { value: f32, min: f32, max: f32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no face detected in frame")]
    NoFaceDetected,

    #[error("sample is inconsistent with identity {0}")]
    InconsistentSample(Uuid),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("extractor initialization failed: {0}")]
    InitializationFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
}

pub type FaceResult<T> = std::result::Result<T, FaceError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<FaceError> for ApiError {
    fn from(err: FaceError) -> Self {
        let message = err.to_string();
        match err {
            FaceError::NotFound(_) => ApiError::NotFound(message),
            FaceError::IndexOutOfRange { .. } => ApiError::NotFound(message),
            FaceError::DimensionMismatch { .. }
            | FaceError::InvalidThreshold { .. }
            | FaceError::InvalidInput(_) => ApiError::BadRequest(message),
            FaceError::NoFaceDetected => ApiError::Unprocessable(message),
            FaceError::InconsistentSample(_) => ApiError::Conflict(message),
            FaceError::InitializationFailed(_) => ApiError::Unavailable(message),
            FaceError::ExtractionFailed(_) | FaceError::PersistenceFailed(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::bad_request(err.to_string())
    }
}
