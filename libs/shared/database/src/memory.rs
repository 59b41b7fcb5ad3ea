//! Process-local store used by tests and by deployments without Supabase.
//!
//! Each table sits behind its own `RwLock`; every atomic repository
//! operation completes under a single write guard.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, BranchPolicy, NewAppointment,
    QueueTicket, ReminderRecord, ReminderStatus, RescheduleRecord, ServicePoint, TicketDraft,
    TicketStatus, PENDING_CLAIM_TIMEOUT_MINUTES,
};

use crate::error::StoreError;
use crate::repository::{
    AppointmentGuard, AppointmentRepository, PolicyRepository, ReminderRepository,
    RescheduleRepository, ServicePointRepository, TicketRepository,
};

struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Table<Appointment> {
    /// Active appointments holding the slot, ignoring `except`.
    fn occupancy(
        &self,
        branch_id: i64,
        service_id: i64,
        at: DateTime<Utc>,
        except: Option<i64>,
    ) -> usize {
        self.rows
            .values()
            .filter(|a| {
                Some(a.id) != except
                    && a.branch_id == branch_id
                    && a.service_id == service_id
                    && a.scheduled_at == at
                    && a.status.is_active()
            })
            .count()
    }

    fn guarded_row(
        &mut self,
        id: i64,
        guard: AppointmentGuard,
    ) -> Result<&mut Appointment, StoreError> {
        let stored = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {}", id)))?;

        if AppointmentGuard::of(stored) != guard {
            return Err(StoreError::Conflict(format!(
                "appointment {} is {} after {} reschedule(s), expected {} after {}",
                id, stored.status, stored.reschedule_count, guard.status, guard.reschedule_count
            )));
        }
        Ok(stored)
    }
}

fn require_pending(record: &ReminderRecord) -> Result<(), StoreError> {
    if record.status != ReminderStatus::Pending {
        return Err(StoreError::Conflict(format!(
            "reminder {} is {}, expected {}",
            record.id,
            record.status,
            ReminderStatus::Pending
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryStore {
    /// Keyed by branch id; `id` values come from `policy_ids`.
    policies: RwLock<BTreeMap<i64, BranchPolicy>>,
    policy_ids: RwLock<i64>,
    appointments: RwLock<Table<Appointment>>,
    reschedules: RwLock<Table<RescheduleRecord>>,
    service_points: RwLock<Table<ServicePoint>>,
    tickets: RwLock<Table<QueueTicket>>,
    reminders: RwLock<Table<ReminderRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryStore {
    async fn find_policy(&self, branch_id: i64) -> Result<Option<BranchPolicy>, StoreError> {
        Ok(self.policies.read().await.get(&branch_id).cloned())
    }

    async fn save_policy(
        &self,
        mut policy: BranchPolicy,
        expected_version: Option<i64>,
    ) -> Result<BranchPolicy, StoreError> {
        let mut policies = self.policies.write().await;

        match (policies.get(&policy.branch_id), expected_version) {
            (Some(_), None) => {
                return Err(StoreError::Conflict(format!(
                    "policy for branch {} already exists",
                    policy.branch_id
                )));
            }
            (None, Some(_)) => {
                return Err(StoreError::Conflict(format!(
                    "policy for branch {} was removed concurrently",
                    policy.branch_id
                )));
            }
            (Some(current), Some(expected)) if current.version != expected => {
                return Err(StoreError::Conflict(format!(
                    "policy for branch {} is at version {}, expected {}",
                    policy.branch_id, current.version, expected
                )));
            }
            (Some(current), Some(_)) => {
                policy.id = current.id;
            }
            (None, None) => {
                let mut ids = self.policy_ids.write().await;
                *ids += 1;
                policy.id = *ids;
            }
        }

        policies.insert(policy.branch_id, policy.clone());
        Ok(policy)
    }

    async fn delete_policy(&self, branch_id: i64) -> Result<bool, StoreError> {
        Ok(self.policies.write().await.remove(&branch_id).is_some())
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryStore {
    async fn create_appointment(
        &self,
        appointment: NewAppointment,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        let mut table = self.appointments.write().await;

        if table
            .rows
            .values()
            .any(|a| a.confirmation_code == appointment.confirmation_code)
        {
            return Err(StoreError::Duplicate(format!(
                "confirmation code {}",
                appointment.confirmation_code
            )));
        }

        let occupied = table.occupancy(
            appointment.branch_id,
            appointment.service_id,
            appointment.scheduled_at,
            None,
        );
        if occupied >= slot_capacity {
            return Err(StoreError::SlotFull(format!(
                "slot {} is full ({} of {})",
                appointment.scheduled_at, occupied, slot_capacity
            )));
        }

        let id = table.allocate_id();
        let created = appointment.into_appointment(id);
        table.rows.insert(id, created.clone());
        debug!("Stored appointment {}", id);
        Ok(created)
    }

    async fn find_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.rows.get(&id).cloned())
    }

    async fn find_by_confirmation_code(
        &self,
        code: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .appointments
            .read()
            .await
            .rows
            .values()
            .find(|a| a.confirmation_code == code)
            .cloned())
    }

    async fn update_appointment_guarded(
        &self,
        appointment: Appointment,
        guard: AppointmentGuard,
    ) -> Result<Appointment, StoreError> {
        let mut table = self.appointments.write().await;
        let stored = table.guarded_row(appointment.id, guard)?;
        *stored = appointment.clone();
        Ok(appointment)
    }

    async fn reschedule_appointment(
        &self,
        appointment: Appointment,
        mut record: RescheduleRecord,
        guard: AppointmentGuard,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        // Appointments before history, the only order both tables are held in.
        let mut table = self.appointments.write().await;
        let stored_at = table.guarded_row(appointment.id, guard)?.scheduled_at;

        if stored_at != appointment.scheduled_at {
            let occupied = table.occupancy(
                appointment.branch_id,
                appointment.service_id,
                appointment.scheduled_at,
                Some(appointment.id),
            );
            if occupied >= slot_capacity {
                return Err(StoreError::SlotFull(format!(
                    "slot {} is full ({} of {})",
                    appointment.scheduled_at, occupied, slot_capacity
                )));
            }
        }

        let mut history = self.reschedules.write().await;
        record.id = history.allocate_id();
        history.rows.insert(record.id, record);
        table.rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let table = self.appointments.read().await;
        let mut rows: Vec<Appointment> = table
            .rows
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.scheduled_at, a.id));
        Ok(rows)
    }

    async fn list_scheduled_branch_ids(&self, from: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let table = self.appointments.read().await;
        let branches: BTreeSet<i64> = table
            .rows
            .values()
            .filter(|a| a.status == AppointmentStatus::Scheduled && a.scheduled_at >= from)
            .map(|a| a.branch_id)
            .collect();
        Ok(branches.into_iter().collect())
    }
}

#[async_trait]
impl RescheduleRepository for InMemoryStore {
    async fn list_reschedules(
        &self,
        appointment_id: i64,
    ) -> Result<Vec<RescheduleRecord>, StoreError> {
        let table = self.reschedules.read().await;
        Ok(table
            .rows
            .values()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ServicePointRepository for InMemoryStore {
    async fn find_service_point(&self, id: i64) -> Result<Option<ServicePoint>, StoreError> {
        Ok(self.service_points.read().await.rows.get(&id).cloned())
    }

    async fn list_service_points(&self, branch_id: i64) -> Result<Vec<ServicePoint>, StoreError> {
        let table = self.service_points.read().await;
        Ok(table
            .rows
            .values()
            .filter(|p| p.branch_id == branch_id)
            .cloned()
            .collect())
    }

    async fn save_service_point(
        &self,
        mut point: ServicePoint,
    ) -> Result<ServicePoint, StoreError> {
        let mut table = self.service_points.write().await;
        if point.id == 0 {
            point.id = table.allocate_id();
        } else if point.id >= table.next_id {
            table.next_id = point.id + 1;
        }
        table.rows.insert(point.id, point.clone());
        Ok(point)
    }
}

#[async_trait]
impl TicketRepository for InMemoryStore {
    async fn issue_ticket(&self, draft: TicketDraft) -> Result<QueueTicket, StoreError> {
        let mut table = self.tickets.write().await;

        if table
            .rows
            .values()
            .any(|t| t.appointment_id == draft.appointment_id)
        {
            return Err(StoreError::Duplicate(format!(
                "appointment {} already holds a ticket",
                draft.appointment_id
            )));
        }

        let last_number = table
            .rows
            .values()
            .filter(|t| t.branch_id == draft.branch_id && t.queue_date == draft.queue_date)
            .map(|t| t.ticket_number)
            .max()
            .unwrap_or(0);

        let id = table.allocate_id();
        let ticket = draft.into_ticket(id, last_number + 1);
        table.rows.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn find_ticket(&self, id: i64) -> Result<Option<QueueTicket>, StoreError> {
        Ok(self.tickets.read().await.rows.get(&id).cloned())
    }

    async fn find_ticket_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<QueueTicket>, StoreError> {
        Ok(self
            .tickets
            .read()
            .await
            .rows
            .values()
            .find(|t| t.appointment_id == appointment_id)
            .cloned())
    }

    async fn update_ticket_if_status(
        &self,
        ticket: QueueTicket,
        expected_status: TicketStatus,
    ) -> Result<QueueTicket, StoreError> {
        let mut table = self.tickets.write().await;
        let stored = table
            .rows
            .get_mut(&ticket.id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket.id)))?;

        if stored.status != expected_status {
            return Err(StoreError::Conflict(format!(
                "ticket {} is {}, expected {}",
                ticket.id, stored.status, expected_status
            )));
        }

        *stored = ticket.clone();
        Ok(ticket)
    }

    async fn list_tickets(
        &self,
        branch_id: i64,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTicket>, StoreError> {
        let table = self.tickets.read().await;
        let mut tickets: Vec<QueueTicket> = table
            .rows
            .values()
            .filter(|t| t.branch_id == branch_id && t.queue_date == queue_date)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.ticket_number);
        Ok(tickets)
    }
}

#[async_trait]
impl ReminderRepository for InMemoryStore {
    async fn claim_reminder(
        &self,
        appointment_id: i64,
        offset_hours: u32,
        expected_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderRecord>, StoreError> {
        let mut table = self.reminders.write().await;
        let stale_before = now - Duration::minutes(PENDING_CLAIM_TIMEOUT_MINUTES);

        let matching: Vec<&ReminderRecord> = table
            .rows
            .values()
            .filter(|r| r.answers(appointment_id, offset_hours, expected_send_at))
            .collect();

        if matching.iter().any(|r| r.status == ReminderStatus::Sent) {
            return Ok(None);
        }
        if matching
            .iter()
            .any(|r| r.status == ReminderStatus::Pending && r.updated_at > stale_before)
        {
            return Ok(None);
        }

        let retry_id = matching
            .iter()
            .find(|r| matches!(r.status, ReminderStatus::Failed | ReminderStatus::Pending))
            .map(|r| r.id);

        if let Some(id) = retry_id {
            if let Some(record) = table.rows.get_mut(&id) {
                record.status = ReminderStatus::Pending;
                record.retry_count += 1;
                record.updated_at = now;
                return Ok(Some(record.clone()));
            }
        }

        let id = table.allocate_id();
        let record = ReminderRecord {
            id,
            appointment_id,
            offset_hours,
            status: ReminderStatus::Pending,
            expected_send_at,
            sent_at: None,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(id, record.clone());
        Ok(Some(record))
    }

    async fn mark_reminder_sent(
        &self,
        id: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError> {
        let mut table = self.reminders.write().await;
        let record = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reminder {}", id)))?;
        require_pending(record)?;
        record.status = ReminderStatus::Sent;
        record.sent_at = Some(sent_at);
        record.error_message = None;
        record.updated_at = sent_at;
        Ok(record.clone())
    }

    async fn mark_reminder_failed(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError> {
        let mut table = self.reminders.write().await;
        let record = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reminder {}", id)))?;
        require_pending(record)?;
        record.status = ReminderStatus::Failed;
        record.error_message = Some(error.to_string());
        record.updated_at = at;
        Ok(record.clone())
    }

    async fn release_reminder(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut table = self.reminders.write().await;
        match table.rows.get_mut(&id) {
            Some(record) if record.status == ReminderStatus::Pending => {
                record.status = ReminderStatus::Cancelled;
                record.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("reminder {}", id))),
        }
    }

    async fn cancel_pending_reminders(
        &self,
        appointment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut table = self.reminders.write().await;
        let mut cancelled = 0;
        for record in table.rows.values_mut() {
            if record.appointment_id == appointment_id && record.status == ReminderStatus::Pending {
                record.status = ReminderStatus::Cancelled;
                record.updated_at = at;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn list_reminders(&self, appointment_id: i64) -> Result<Vec<ReminderRecord>, StoreError> {
        let table = self.reminders.read().await;
        Ok(table
            .rows
            .values()
            .filter(|r| r.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}
