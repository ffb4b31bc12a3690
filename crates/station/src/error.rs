//! Recoverable rejections surfaced to the HTTP and push-channel layers.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StationError {
    #[error("no such relay: {0}")]
    InvalidTarget(String),

    #[error("relay commands are rejected in automatic mode")]
    RejectedByMode,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("temperature probe disconnected")]
    SensorDisconnected,
}

impl StationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTarget(_) | Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::RejectedByMode => StatusCode::FORBIDDEN,
            Self::SensorDisconnected => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<JsonRejection> for StationError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}

impl IntoResponse for StationError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
