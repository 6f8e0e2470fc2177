//! HTTP error responses.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use voice_relay_pipeline::{FailureCategory, PipelineError};
use voice_relay_providers::ServiceType;

/// Error returned by every handler.
///
/// `category` tells the client which degradation message to show; the
/// message itself never carries provider or internal detail.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub category: &'static str,
    pub stage: Option<ServiceType>,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            category: "input",
            stage: None,
            message: msg.into(),
        }
    }

    pub fn too_many_requests() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            category: "rate_limited",
            stage: None,
            message: "Too many requests, slow down".to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        error!(error = %msg, "Internal gateway error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            category: "internal",
            stage: None,
            message: "Internal server error".to_string(),
        }
    }

    pub fn from_multipart(err: MultipartError) -> Self {
        let status = err.status();
        Self {
            status,
            category: "input",
            stage: None,
            message: if status == StatusCode::PAYLOAD_TOO_LARGE {
                "Audio file too large".to_string()
            } else {
                format!("Invalid multipart payload: {}", err.body_text())
            },
        }
    }
}

fn category_label(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::Input => "input",
        FailureCategory::SpeechRecognition => "speech_recognition",
        FailureCategory::Completion => "completion",
        FailureCategory::Synthesis => "synthesis",
        FailureCategory::Timeout => "timeout",
        FailureCategory::Internal => "internal",
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let category = category_label(err.category());
        let stage = err.stage();
        let (status, message) = match &err {
            PipelineError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            PipelineError::PayloadTooLarge { limit, .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Audio file too large (max {} MB)", limit / (1024 * 1024)),
            ),
            PipelineError::EmptyResult {
                stage: ServiceType::Stt,
            } => (
                StatusCode::BAD_REQUEST,
                "Could not transcribe audio".to_string(),
            ),
            PipelineError::EmptyResult { stage } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("The {stage} service returned nothing"),
            ),
            PipelineError::StageTimeout { stage, .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("The {stage} service timed out"),
            ),
            PipelineError::StageFailed { stage, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("The {stage} service is unavailable"),
            ),
            PipelineError::Internal(detail) => {
                error!(error = %detail, "Pipeline internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        Self {
            status,
            category,
            stage,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "category": self.category,
                "stage": self.stage.map(|s| s.as_str()),
                "code": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}
