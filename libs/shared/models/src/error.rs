use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Stable error codes consumers switch on. Messages travelling next to them
/// are for humans and are never parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PastDate,
    ExceedsMaxAdvance,
    PastAppointment,
    InsufficientCancellationTime,
    InsufficientRescheduleTime,
    TooLateToReschedule,
    MaxReschedulesExceeded,
    IllegalStateTransition,
    ServicePointIncapable,
    ServicePointInactive,
    DuplicateTicket,
    SlotUnavailable,
    ConcurrentModification,
    NotFound,
    Forbidden,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PastDate => "PAST_DATE",
            ErrorCode::ExceedsMaxAdvance => "EXCEEDS_MAX_ADVANCE",
            ErrorCode::PastAppointment => "PAST_APPOINTMENT",
            ErrorCode::InsufficientCancellationTime => "INSUFFICIENT_CANCELLATION_TIME",
            ErrorCode::InsufficientRescheduleTime => "INSUFFICIENT_RESCHEDULE_TIME",
            ErrorCode::TooLateToReschedule => "TOO_LATE_TO_RESCHEDULE",
            ErrorCode::MaxReschedulesExceeded => "MAX_RESCHEDULES_EXCEEDED",
            ErrorCode::IllegalStateTransition => "ILLEGAL_STATE_TRANSITION",
            ErrorCode::ServicePointIncapable => "SERVICE_POINT_INCAPABLE",
            ErrorCode::ServicePointInactive => "SERVICE_POINT_INACTIVE",
            ErrorCode::DuplicateTicket => "DUPLICATE_TICKET",
            ErrorCode::SlotUnavailable => "SLOT_UNAVAILABLE",
            ErrorCode::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn is_business_rule(&self) -> bool {
        !matches!(self, ErrorCode::InternalError)
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::IllegalStateTransition
            | ErrorCode::DuplicateTicket
            | ErrorCode::SlotUnavailable
            | ErrorCode::ConcurrentModification => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("{message}")]
    Business { code: ErrorCode, message: String },
}

impl AppError {
    pub fn business(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Business {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Internal(msg) => {
                tracing::error!("Internal error surfaced to client: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "success": false,
                        "error_code": ErrorCode::InternalError,
                        "message": "An internal error occurred"
                    }),
                )
            }
            AppError::Business { code, message } => (
                code.status(),
                json!({
                    "success": false,
                    "error_code": code,
                    "message": message
                }),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, self);
        } else {
            tracing::debug!("Request rejected: {}: {}", status, self);
        }

        (status, Json(body)).into_response()
    }
}
