use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_models::error::ErrorCode;
use shared_models::AppointmentStatus;

use crate::error::AppointmentError;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub branch_id: i64,
    pub service_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_scheduled_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoShowSweepRequest {
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyModeRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub branch_id: Option<i64>,
    pub service_id: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// ==============================================================================
// RESULTS
// ==============================================================================

/// Outcome of a booking rule check. `error_code` is what callers switch on;
/// `message` is for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub error_code: Option<ErrorCode>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error_code: None,
            message: None,
        }
    }

    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_code: Some(code),
            message: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<(), AppointmentError> {
        if self.valid {
            return Ok(());
        }
        let code = self.error_code.unwrap_or(ErrorCode::InvalidRequest);
        let message = self.message.unwrap_or_else(|| code.to_string());
        Err(AppointmentError::rule(code, message))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoShowSweepSummary {
    pub examined: usize,
    pub marked: usize,
    /// Appointments that changed status between the scan and the write.
    pub skipped: usize,
}
