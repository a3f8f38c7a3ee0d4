//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses.
//!
//! ## Error Categories:
//! - **Retrieval**: remote media source unreachable or unsupported
//! - **Decode**: audio payload unparseable or format mismatch
//! - **Transcription**: the recognition engine failed
//! - **NotFound**: unknown job id on query (404)
//! - **BadRequest**: malformed request body (400)
//! - **Internal**: everything else server-side (500)
//!
//! Retrieval/Decode/Transcription errors mostly occur during background job
//! execution, where they are converted into a terminal `Failed` status with
//! this type's `Display` output as the message. When they do surface on a
//! request path they map to the HTTP status codes below.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error taxonomy.
///
/// ## Rust Concepts:
/// - **enum with data**: each variant carries a human-readable message
/// - **Display + ResponseError**: one type serves both the job boundary
///   (message for the `Failed` record) and the HTTP boundary (JSON response)
#[derive(Debug)]
pub enum AppError {
    /// Remote media source could not be fetched
    Retrieval(String),

    /// Input could not be parsed as audio in a supported format
    Decode(String),

    /// The recognition engine rejected or failed on the audio
    Transcription(String),

    /// Requested resource does not exist
    NotFound(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Retrieval(msg) => write!(f, "Retrieval error: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::Transcription(msg) => write!(f, "Transcription error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts errors into the JSON error responses clients see.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "no job with id ...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Retrieval(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "retrieval_error",
                msg.clone(),
            ),
            AppError::Decode(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "decode_error",
                msg.clone(),
            ),
            AppError::Transcription(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "transcription_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Engine and model internals report through anyhow; at the job boundary
/// those failures are transcription failures.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Transcription(err.to_string())
    }
}

/// JSON body parsing failures are the client's problem.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
