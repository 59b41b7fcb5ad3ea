use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==============================================================================
// APPOINTMENT
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: i64,
    pub branch_id: i64,
    pub service_id: i64,
    pub service_point_id: Option<i64>,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub original_scheduled_at: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    pub confirmation_code: String,
    pub reschedule_count: u32,
    pub notes: Option<String>,
    pub attended_at: Option<DateTime<Utc>>,
    pub no_show_marked_at: Option<DateTime<Utc>>,
    pub auto_marked_as_no_show: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::CheckedIn,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::CheckedIn => "checked-in",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Scheduled or checked-in appointments still occupy their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert payload; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub branch_id: i64,
    pub service_id: i64,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub confirmation_code: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAppointment {
    pub fn into_appointment(self, id: i64) -> Appointment {
        Appointment {
            id,
            branch_id: self.branch_id,
            service_id: self.service_id,
            service_point_id: None,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            scheduled_at: self.scheduled_at,
            original_scheduled_at: None,
            status: AppointmentStatus::Scheduled,
            confirmation_code: self.confirmation_code,
            reschedule_count: 0,
            notes: self.notes,
            attended_at: None,
            no_show_marked_at: None,
            auto_marked_as_no_show: false,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Row filter for appointment listings. Time bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub branch_id: Option<i64>,
    pub service_id: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.branch_id.map_or(true, |b| appointment.branch_id == b)
            && self.service_id.map_or(true, |s| appointment.service_id == s)
            && self.status.map_or(true, |s| appointment.status == s)
            && self.from.map_or(true, |from| appointment.scheduled_at >= from)
            && self.to.map_or(true, |to| appointment.scheduled_at <= to)
    }
}

// ==============================================================================
// RESCHEDULE HISTORY
// ==============================================================================

/// Immutable audit row, one per successful reschedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleRecord {
    pub id: i64,
    pub appointment_id: i64,
    pub previous_scheduled_at: DateTime<Utc>,
    pub new_scheduled_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
