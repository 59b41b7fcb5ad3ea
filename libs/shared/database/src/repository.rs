//! Persistence contracts consumed by the lifecycle engine.
//!
//! Every method that the engine relies on for a serialization point
//! (`create_appointment`, `update_appointment_guarded`,
//! `reschedule_appointment`, `issue_ticket`, `update_ticket_if_status`,
//! `claim_reminder`, `save_policy`) must be atomic in the implementing
//! backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, BranchPolicy, NewAppointment,
    QueueTicket, ReminderRecord, RescheduleRecord, ServicePoint, TicketDraft, TicketStatus,
};

use crate::error::StoreError;

/// Precondition of a guarded appointment write. Every write either changes
/// the status or bumps `reschedule_count`, so the pair identifies the row
/// version the caller read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppointmentGuard {
    pub status: AppointmentStatus,
    pub reschedule_count: u32,
}

impl AppointmentGuard {
    pub fn of(appointment: &Appointment) -> Self {
        Self {
            status: appointment.status,
            reschedule_count: appointment.reschedule_count,
        }
    }
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn find_policy(&self, branch_id: i64) -> Result<Option<BranchPolicy>, StoreError>;

    /// `expected_version = None` inserts and fails with `Conflict` if a record
    /// already exists; `Some(v)` updates only when the stored version is `v`.
    async fn save_policy(
        &self,
        policy: BranchPolicy,
        expected_version: Option<i64>,
    ) -> Result<BranchPolicy, StoreError>;

    async fn delete_policy(&self, branch_id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Fails with `SlotFull` once `slot_capacity` active appointments already
    /// hold the same branch, service and start time.
    async fn create_appointment(
        &self,
        appointment: NewAppointment,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError>;

    async fn find_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError>;

    async fn find_by_confirmation_code(
        &self,
        code: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Writes the row only if the stored one still matches `guard`; fails with
    /// `Conflict` otherwise.
    async fn update_appointment_guarded(
        &self,
        appointment: Appointment,
        guard: AppointmentGuard,
    ) -> Result<Appointment, StoreError>;

    /// Moves the appointment to `appointment.scheduled_at` and appends
    /// `record` to its history in one step. Fails with `Conflict` when the
    /// stored row no longer matches `guard` and with `SlotFull` when
    /// `slot_capacity` other active appointments already hold the new time.
    async fn reschedule_appointment(
        &self,
        appointment: Appointment,
        record: RescheduleRecord,
        guard: AppointmentGuard,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError>;

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Branches holding at least one `scheduled` appointment at or after `from`.
    async fn list_scheduled_branch_ids(&self, from: DateTime<Utc>) -> Result<Vec<i64>, StoreError>;
}

#[async_trait]
pub trait RescheduleRepository: Send + Sync {
    async fn list_reschedules(
        &self,
        appointment_id: i64,
    ) -> Result<Vec<RescheduleRecord>, StoreError>;
}

#[async_trait]
pub trait ServicePointRepository: Send + Sync {
    async fn find_service_point(&self, id: i64) -> Result<Option<ServicePoint>, StoreError>;

    async fn list_service_points(&self, branch_id: i64) -> Result<Vec<ServicePoint>, StoreError>;

    /// Upsert by id; `id == 0` assigns a new one.
    async fn save_service_point(&self, point: ServicePoint) -> Result<ServicePoint, StoreError>;
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Assigns `max(ticket_number for branch/day) + 1`. Fails with `Duplicate`
    /// when the appointment already holds a ticket.
    async fn issue_ticket(&self, draft: TicketDraft) -> Result<QueueTicket, StoreError>;

    async fn find_ticket(&self, id: i64) -> Result<Option<QueueTicket>, StoreError>;

    async fn find_ticket_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<QueueTicket>, StoreError>;

    async fn update_ticket_if_status(
        &self,
        ticket: QueueTicket,
        expected_status: TicketStatus,
    ) -> Result<QueueTicket, StoreError>;

    async fn list_tickets(
        &self,
        branch_id: i64,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTicket>, StoreError>;
}

#[async_trait]
pub trait ReminderRepository: Send + Sync {
    /// Reserves the right to send the reminder for `(appointment_id,
    /// offset_hours)` around `expected_send_at`. Returns `None` when a `sent`
    /// record, or a `pending` one claimed less than the pending timeout ago,
    /// already answers the key.
    async fn claim_reminder(
        &self,
        appointment_id: i64,
        offset_hours: u32,
        expected_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderRecord>, StoreError>;

    /// Only a `pending` record moves; anything else is a `Conflict`. The same
    /// holds for `mark_reminder_failed`.
    async fn mark_reminder_sent(
        &self,
        id: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError>;

    async fn mark_reminder_failed(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError>;

    /// Gives up a claim: a `pending` record becomes `cancelled`. Returns
    /// whether anything changed.
    async fn release_reminder(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Moves every `pending` record of the appointment to `cancelled`.
    async fn cancel_pending_reminders(
        &self,
        appointment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn list_reminders(&self, appointment_id: i64) -> Result<Vec<ReminderRecord>, StoreError>;
}

/// One handle per repository, all usually backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub policies: Arc<dyn PolicyRepository>,
    pub appointments: Arc<dyn AppointmentRepository>,
    pub reschedules: Arc<dyn RescheduleRepository>,
    pub service_points: Arc<dyn ServicePointRepository>,
    pub tickets: Arc<dyn TicketRepository>,
    pub reminders: Arc<dyn ReminderRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PolicyRepository
            + AppointmentRepository
            + RescheduleRepository
            + ServicePointRepository
            + TicketRepository
            + ReminderRepository
            + 'static,
    {
        Self {
            policies: store.clone(),
            appointments: store.clone(),
            reschedules: store.clone(),
            service_points: store.clone(),
            tickets: store.clone(),
            reminders: store,
        }
    }
}
