//! Error types for the Remote Torrent server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::descriptor::DescriptorError;
use crate::identifier::InvalidIdentifier;
use crate::transfer::MergeError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Registry and reconfiguration errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error("Invalid source: {0}")]
    InvalidSource(#[from] DescriptorError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Torrent not found: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Torrent metadata not loaded yet: {0}")]
    NotReady(String),

    #[error("Already stopped: {0}")]
    AlreadyStopped(String),

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    #[error("No active torrent session")]
    NoSession,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Session protocol violation: {0}")]
    Protocol(#[from] MergeError),
}

impl EngineError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidIdentifier(_)
            | EngineError::InvalidSource(_)
            | EngineError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) | EngineError::FileNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::NotReady(_)
            | EngineError::AlreadyStopped(_)
            | EngineError::AlreadyRunning(_) => StatusCode::CONFLICT,
            EngineError::NoSession => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Session(_) | EngineError::Protocol(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidIdentifier(_) => "invalid_identifier",
            EngineError::InvalidSource(_) => "invalid_source",
            EngineError::InvalidParams(_) => "invalid_params",
            EngineError::NotFound(_) => "not_found",
            EngineError::FileNotFound(_) => "file_not_found",
            EngineError::NotReady(_) => "not_ready",
            EngineError::AlreadyStopped(_) => "already_stopped",
            EngineError::AlreadyRunning(_) => "already_running",
            EngineError::NoSession => "no_session",
            EngineError::Session(_) => "session_error",
            EngineError::Protocol(_) => "protocol_error",
        }
    }
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Engine(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!("Engine error: {}", e);
                }
                (status, e.kind(), e.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
