use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-width of both the selection window and the dedup window.
pub const REMINDER_TOLERANCE_MINUTES: i64 = 30;

/// A `pending` claim older than this is treated as abandoned and may be
/// reclaimed by a later dispatcher run.
pub const PENDING_CLAIM_TIMEOUT_MINUTES: i64 = 10;

pub fn reminder_tolerance() -> Duration {
    Duration::minutes(REMINDER_TOLERANCE_MINUTES)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Sent => write!(f, "sent"),
            ReminderStatus::Failed => write!(f, "failed"),
            ReminderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One row per attempted send; `(appointment_id, offset_hours)` is the
/// deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderRecord {
    pub id: i64,
    pub appointment_id: i64,
    pub offset_hours: u32,
    pub status: ReminderStatus,
    /// `scheduled_at - offset_hours` at the time the record was claimed.
    pub expected_send_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderRecord {
    pub fn answers(
        &self,
        appointment_id: i64,
        offset_hours: u32,
        expected_send_at: DateTime<Utc>,
    ) -> bool {
        self.appointment_id == appointment_id
            && self.offset_hours == offset_hours
            && (self.expected_send_at - expected_send_at).abs() <= reminder_tolerance()
    }
}
