use thiserror::Error;
use tracing::error;

use shared_database::StoreError;
use shared_models::error::{AppError, ErrorCode};
use shared_models::AppointmentStatus;

#[derive(Error, Debug)]
pub enum AppointmentError {
    /// A booking, cancellation or reschedule rule rejected the request.
    #[error("{message}")]
    RuleViolation { code: ErrorCode, message: String },

    #[error("Appointment cannot move from {from} to {to}")]
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("A {status} appointment cannot be rescheduled")]
    NotReschedulable { status: AppointmentStatus },

    #[error("Appointment {0} not found")]
    NotFound(i64),

    #[error("The requested slot is fully booked")]
    SlotUnavailable,

    /// Another writer changed the appointment between read and write.
    #[error("Appointment {0} was changed concurrently, retry the request")]
    ConcurrentUpdate(i64),

    #[error("No active service point in branch {branch_id} can serve service {service_id}")]
    NoCapableServicePoint { branch_id: i64, service_id: i64 },

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AppointmentError {
    pub fn rule(code: ErrorCode, message: impl Into<String>) -> Self {
        AppointmentError::RuleViolation {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppointmentError::RuleViolation { code, .. } => *code,
            AppointmentError::IllegalTransition { .. }
            | AppointmentError::NotReschedulable { .. } => ErrorCode::IllegalStateTransition,
            AppointmentError::NotFound(_) | AppointmentError::Store(StoreError::NotFound(_)) => {
                ErrorCode::NotFound
            }
            AppointmentError::SlotUnavailable => ErrorCode::SlotUnavailable,
            AppointmentError::ConcurrentUpdate(_) => ErrorCode::ConcurrentModification,
            AppointmentError::NoCapableServicePoint { .. } => ErrorCode::ServicePointIncapable,
            AppointmentError::Forbidden(_) => ErrorCode::Forbidden,
            AppointmentError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AppointmentError::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let code = err.code();
        if code.is_business_rule() {
            AppError::business(code, err.to_string())
        } else {
            error!("Appointment operation failed: {:?}", err);
            AppError::Internal(err.to_string())
        }
    }
}
