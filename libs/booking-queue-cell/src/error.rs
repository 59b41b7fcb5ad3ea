use thiserror::Error;
use tracing::error;

use appointment_cell::AppointmentError;
use shared_database::StoreError;
use shared_models::error::{AppError, ErrorCode};
use shared_models::TicketStatus;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Ticket {0} not found")]
    TicketNotFound(i64),

    #[error("Service point {0} not found")]
    ServicePointNotFound(i64),

    #[error("Service point {0} is not active")]
    ServicePointInactive(i64),

    #[error("Service point {service_point_id} cannot serve service {service_id}")]
    ServicePointIncapable { service_point_id: i64, service_id: i64 },

    #[error("Appointment {0} already holds a queue ticket")]
    DuplicateTicket(i64),

    #[error("Ticket cannot move from {from} to {to}")]
    InvalidStatusTransition { from: TicketStatus, to: TicketStatus },

    #[error("Ticket {0} is complete and can no longer be transferred")]
    TicketClosed(i64),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::TicketNotFound(_) | QueueError::ServicePointNotFound(_) => {
                ErrorCode::NotFound
            }
            QueueError::ServicePointInactive(_) => ErrorCode::ServicePointInactive,
            QueueError::ServicePointIncapable { .. } => ErrorCode::ServicePointIncapable,
            QueueError::DuplicateTicket(_) => ErrorCode::DuplicateTicket,
            QueueError::InvalidStatusTransition { .. } | QueueError::TicketClosed(_) => {
                ErrorCode::IllegalStateTransition
            }
            QueueError::Forbidden(_) => ErrorCode::Forbidden,
            QueueError::Appointment(e) => e.code(),
            QueueError::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            QueueError::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        let code = err.code();
        if code.is_business_rule() {
            AppError::business(code, err.to_string())
        } else {
            error!("Queue operation failed: {:?}", err);
            AppError::Internal(err.to_string())
        }
    }
}
