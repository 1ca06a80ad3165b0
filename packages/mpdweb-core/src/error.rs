//! Centralized error types for the mpdweb core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::artwork::CoverError;
use crate::daemon::DaemonError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DaemonError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "daemon_io_error",
            Self::ConnectTimeout(_) => "daemon_connect_timeout",
            Self::ConnectionClosed => "daemon_connection_closed",
            Self::Protocol(_) => "daemon_protocol_error",
            Self::Ack { .. } => "daemon_ack",
            Self::MissingField(_) => "daemon_missing_field",
            Self::InvalidCommand(_) => "invalid_command",
        }
    }
}

impl ErrorCode for CoverError {
    fn code(&self) -> &'static str {
        match self {
            Self::Write { .. } => "cover_write_failed",
            Self::Replace { .. } => "cover_replace_failed",
            Self::Io { .. } => "cover_io_error",
        }
    }
}

/// Application-wide error type for the mpdweb server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MpdWebError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The daemon rejected the command.
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// The daemon connection failed or could not be established.
    #[error("Daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// No cover image is stored.
    #[error("No cover available")]
    CoverNotFound,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MpdWebError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::CommandRejected(_) => "command_rejected",
            Self::DaemonUnavailable(_) => "daemon_unavailable",
            Self::CoverNotFound => "cover_not_found",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::CommandRejected(_) => StatusCode::BAD_REQUEST,
            Self::DaemonUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::CoverNotFound => StatusCode::NOT_FOUND,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type MpdWebResult<T> = Result<T, MpdWebError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for MpdWebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DaemonError> for MpdWebError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::InvalidCommand(_) => Self::InvalidRequest(err.to_string()),
            ref e if e.is_fatal() => Self::DaemonUnavailable(err.to_string()),
            _ => Self::CommandRejected(err.to_string()),
        }
    }
}

impl From<CoverError> for MpdWebError {
    fn from(err: CoverError) -> Self {
        log::error!("[Cover] {} ({})", err, err.code());
        Self::Internal(err.to_string())
    }
}
