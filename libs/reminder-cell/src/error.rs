use thiserror::Error;
use tracing::error;

use shared_database::StoreError;
use shared_models::error::{AppError, ErrorCode};

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Reminder has no recipient address")]
    NoRecipient,

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ReminderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReminderError::InvalidConfig(_) | ReminderError::NoRecipient => {
                ErrorCode::InvalidRequest
            }
            ReminderError::Forbidden(_) => ErrorCode::Forbidden,
            ReminderError::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            ReminderError::Transport(_) | ReminderError::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl From<reqwest::Error> for ReminderError {
    fn from(err: reqwest::Error) -> Self {
        ReminderError::Transport(err.to_string())
    }
}

impl From<ReminderError> for AppError {
    fn from(err: ReminderError) -> Self {
        let code = err.code();
        if code.is_business_rule() {
            AppError::business(code, err.to_string())
        } else {
            error!("Reminder operation failed: {:?}", err);
            AppError::Internal(err.to_string())
        }
    }
}
