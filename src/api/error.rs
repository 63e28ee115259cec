//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::admission::AdmissionError;
use crate::analysis::AnalysisError;
use crate::fetch::DownloadError;
use crate::thumbnails::{ExtractionError, PipelineError};

const UNREACHABLE_MESSAGE: &str = "Unable to connect to the URL. Please check if the URL is accessible.";
const NOT_ALLOWED_MESSAGE: &str = "URL is not allowed";

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    message: Option<String>,
    details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: None,
            details: None,
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(false));
        body.insert("error".to_string(), Value::String(self.error));
        if let Some(message) = self.message {
            body.insert("message".to_string(), Value::String(message));
        }
        if let Some(details) = self.details {
            body.insert("details".to_string(), Value::String(details));
        }
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("Internal server error").with_message(err.to_string())
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::InvalidUrl => Self::bad_request("Invalid URL"),
            AdmissionError::Forbidden(reason) => {
                warn!("Refused URL: {}", reason);
                Self::bad_request(NOT_ALLOWED_MESSAGE)
            }
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Unreachable(detail) => {
                Self::not_found(UNREACHABLE_MESSAGE).with_message(detail)
            }
            DownloadError::RedirectBlocked => {
                warn!("Refused redirect during download");
                Self::bad_request(NOT_ALLOWED_MESSAGE)
            }
            invalid @ DownloadError::InvalidRequest(_) => Self::bad_request(invalid.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Extraction(ExtractionError::Forbidden) => Self::bad_request(NOT_ALLOWED_MESSAGE),
            PipelineError::Extraction(ExtractionError::UnsupportedSource) => {
                Self::bad_request(ExtractionError::UnsupportedSource.to_string())
            }
            other => Self::internal("Thumbnail generation failed").with_message(other.to_string()),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// `{"success": true, ...fields}`.
pub fn success(fields: Value) -> Json<Value> {
    let mut body = json!({ "success": true });
    if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), fields) {
        target.extend(extra);
    }
    Json(body)
}
