//! PostgREST-backed repositories.
//!
//! Compare-and-set writes are filtered `PATCH` requests: an empty
//! representation means the precondition failed. Ticket issuance, reminder
//! claims, capacity-checked bookings and reschedules go through database
//! functions that take the row lock server side. Those functions raise an
//! error containing `slot_full` when the time slot has no room left.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, BranchPolicy, NewAppointment,
    QueueTicket, ReminderRecord, ReminderStatus, RescheduleRecord, ServicePoint, TicketDraft,
    TicketStatus, PENDING_CLAIM_TIMEOUT_MINUTES, REMINDER_TOLERANCE_MINUTES,
};

use crate::error::StoreError;
use crate::repository::{
    AppointmentGuard, AppointmentRepository, PolicyRepository, ReminderRepository,
    RescheduleRepository, ServicePointRepository, TicketRepository,
};
use crate::supabase::{SupabaseApiError, SupabaseClient};

pub struct SupabaseStore {
    client: Arc<SupabaseClient>,
    service_token: String,
}

#[derive(Deserialize)]
struct BranchIdRow {
    branch_id: i64,
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: i64,
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serializes a row for insertion, letting the database assign the id.
fn insert_body<T: serde::Serialize>(row: &T) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(row)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("id");
    }
    Ok(value)
}

fn map_api_error(err: anyhow::Error, context: &str) -> StoreError {
    match err.downcast_ref::<SupabaseApiError>() {
        Some(api) if api.body.contains("slot_full") => StoreError::SlotFull(context.to_string()),
        Some(api) if api.status == 404 => StoreError::NotFound(context.to_string()),
        Some(api) if api.status == 409 => {
            if api.body.contains("duplicate") || api.body.contains("23505") {
                StoreError::Duplicate(context.to_string())
            } else {
                StoreError::Conflict(format!("{}: {}", context, api.body))
            }
        }
        _ => StoreError::Backend(format!("{}: {}", context, err)),
    }
}

fn pending_reminder_path(id: i64) -> String {
    format!(
        "/rest/v1/appointment_reminders?id=eq.{}&status=eq.{}",
        id,
        ReminderStatus::Pending
    )
}

impl SupabaseStore {
    pub fn new(client: Arc<SupabaseClient>, service_token: impl Into<String>) -> Self {
        Self {
            client,
            service_token: service_token.into(),
        }
    }

    async fn get_rows<T>(&self, path: &str, context: &str) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.client
            .request(Method::GET, path, Some(&self.service_token), None)
            .await
            .map_err(|e| map_api_error(e, context))
    }

    async fn first_row<T>(&self, path: &str, context: &str) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(self.get_rows(path, context).await?.into_iter().next())
    }

    async fn write_rows<T>(
        &self,
        method: Method,
        path: &str,
        body: Value,
        context: &str,
    ) -> Result<Vec<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.client
            .request(method, path, Some(&self.service_token), Some(body))
            .await
            .map_err(|e| map_api_error(e, context))
    }

    async fn pending_update_result(
        &self,
        id: i64,
        rows: Vec<ReminderRecord>,
    ) -> Result<ReminderRecord, StoreError> {
        if let Some(updated) = rows.into_iter().next() {
            return Ok(updated);
        }
        let path = format!("/rest/v1/appointment_reminders?id=eq.{}&limit=1", id);
        match self.first_row::<ReminderRecord>(&path, "reminder").await? {
            Some(current) => Err(StoreError::Conflict(format!(
                "reminder {} is {}, expected {}",
                id,
                current.status,
                ReminderStatus::Pending
            ))),
            None => Err(StoreError::NotFound(format!("reminder {}", id))),
        }
    }

    /// Explains why a guarded appointment write matched no row.
    async fn guard_failure(&self, id: i64, guard: AppointmentGuard) -> StoreError {
        let context = format!("appointment {}", id);
        match self.find_appointment(id).await {
            Ok(Some(current)) => StoreError::Conflict(format!(
                "{} is {} after {} reschedule(s), expected {} after {}",
                context,
                current.status,
                current.reschedule_count,
                guard.status,
                guard.reschedule_count
            )),
            Ok(None) => StoreError::NotFound(context),
            Err(e) => e,
        }
    }

    async fn rpc<T>(&self, function: &str, args: Value) -> Result<T, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let path = format!("/rest/v1/rpc/{}", function);
        debug!("Calling database function {}", function);
        self.client
            .request(Method::POST, &path, Some(&self.service_token), Some(args))
            .await
            .map_err(|e| map_api_error(e, function))
    }
}

#[async_trait]
impl PolicyRepository for SupabaseStore {
    async fn find_policy(&self, branch_id: i64) -> Result<Option<BranchPolicy>, StoreError> {
        let path = format!("/rest/v1/branch_policies?branch_id=eq.{}&limit=1", branch_id);
        self.first_row(&path, "branch policy").await
    }

    async fn save_policy(
        &self,
        policy: BranchPolicy,
        expected_version: Option<i64>,
    ) -> Result<BranchPolicy, StoreError> {
        let context = format!("branch policy {}", policy.branch_id);
        let rows: Vec<BranchPolicy> = match expected_version {
            None => {
                let body = insert_body(&policy)?;
                self.write_rows(Method::POST, "/rest/v1/branch_policies", body, &context)
                    .await
                    .map_err(|e| match e {
                        StoreError::Duplicate(msg) => StoreError::Conflict(msg),
                        other => other,
                    })?
            }
            Some(version) => {
                let path = format!(
                    "/rest/v1/branch_policies?branch_id=eq.{}&version=eq.{}",
                    policy.branch_id, version
                );
                self.write_rows(Method::PATCH, &path, insert_body(&policy)?, &context).await?
            }
        };

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Conflict(format!("{} changed concurrently", context)))
    }

    async fn delete_policy(&self, branch_id: i64) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/branch_policies?branch_id=eq.{}", branch_id);
        let rows: Vec<IdRow> = self
            .client
            .request(Method::DELETE, &path, Some(&self.service_token), None)
            .await
            .map_err(|e| map_api_error(e, "branch policy"))?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl AppointmentRepository for SupabaseStore {
    async fn create_appointment(
        &self,
        appointment: NewAppointment,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        self.rpc(
            "create_appointment_with_capacity",
            json!({
                "appointment": serde_json::to_value(&appointment)?,
                "slot_capacity": slot_capacity,
            }),
        )
        .await
    }

    async fn find_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", id);
        self.first_row(&path, "appointment").await
    }

    async fn find_by_confirmation_code(
        &self,
        code: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(None);
        }
        let path = format!("/rest/v1/appointments?confirmation_code=eq.{}&limit=1", code);
        self.first_row(&path, "appointment").await
    }

    async fn update_appointment_guarded(
        &self,
        appointment: Appointment,
        guard: AppointmentGuard,
    ) -> Result<Appointment, StoreError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}&reschedule_count=eq.{}",
            appointment.id, guard.status, guard.reschedule_count
        );
        let context = format!("appointment {}", appointment.id);
        let rows: Vec<Appointment> = self
            .write_rows(Method::PATCH, &path, insert_body(&appointment)?, &context)
            .await?;

        match rows.into_iter().next() {
            Some(updated) => Ok(updated),
            None => Err(self.guard_failure(appointment.id, guard).await),
        }
    }

    async fn reschedule_appointment(
        &self,
        appointment: Appointment,
        record: RescheduleRecord,
        guard: AppointmentGuard,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        let id = appointment.id;
        let moved: Option<Appointment> = self
            .rpc(
                "reschedule_appointment",
                json!({
                    "p_appointment": serde_json::to_value(&appointment)?,
                    "p_record": insert_body(&record)?,
                    "p_expected_status": guard.status,
                    "p_expected_reschedule_count": guard.reschedule_count,
                    "p_slot_capacity": slot_capacity,
                }),
            )
            .await?;

        match moved {
            Some(updated) => Ok(updated),
            None => Err(self.guard_failure(id, guard).await),
        }
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut path = "/rest/v1/appointments?order=scheduled_at.asc,id.asc".to_string();
        if let Some(branch_id) = filter.branch_id {
            path.push_str(&format!("&branch_id=eq.{}", branch_id));
        }
        if let Some(service_id) = filter.service_id {
            path.push_str(&format!("&service_id=eq.{}", service_id));
        }
        if let Some(status) = filter.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(from) = filter.from {
            path.push_str(&format!("&scheduled_at=gte.{}", ts(from)));
        }
        if let Some(to) = filter.to {
            path.push_str(&format!("&scheduled_at=lte.{}", ts(to)));
        }
        self.get_rows(&path, "appointments").await
    }

    async fn list_scheduled_branch_ids(&self, from: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?select=branch_id&status=eq.{}&scheduled_at=gte.{}",
            AppointmentStatus::Scheduled,
            ts(from)
        );
        let rows: Vec<BranchIdRow> = self.get_rows(&path, "appointment branches").await?;
        let branches: BTreeSet<i64> = rows.into_iter().map(|r| r.branch_id).collect();
        Ok(branches.into_iter().collect())
    }
}

#[async_trait]
impl RescheduleRepository for SupabaseStore {
    async fn list_reschedules(
        &self,
        appointment_id: i64,
    ) -> Result<Vec<RescheduleRecord>, StoreError> {
        let path = format!(
            "/rest/v1/appointment_reschedules?appointment_id=eq.{}&order=created_at.asc",
            appointment_id
        );
        self.get_rows(&path, "reschedule records").await
    }
}

#[async_trait]
impl ServicePointRepository for SupabaseStore {
    async fn find_service_point(&self, id: i64) -> Result<Option<ServicePoint>, StoreError> {
        let path = format!("/rest/v1/service_points?id=eq.{}&limit=1", id);
        self.first_row(&path, "service point").await
    }

    async fn list_service_points(&self, branch_id: i64) -> Result<Vec<ServicePoint>, StoreError> {
        let path = format!("/rest/v1/service_points?branch_id=eq.{}&order=id.asc", branch_id);
        self.get_rows(&path, "service points").await
    }

    async fn save_service_point(&self, point: ServicePoint) -> Result<ServicePoint, StoreError> {
        let body = if point.id == 0 {
            insert_body(&point)?
        } else {
            serde_json::to_value(&point)?
        };
        let rows: Vec<ServicePoint> = self
            .client
            .request_with_headers(
                Method::POST,
                "/rest/v1/service_points?on_conflict=id",
                Some(&self.service_token),
                Some(body),
                &[("Prefer", "return=representation,resolution=merge-duplicates")],
            )
            .await
            .map_err(|e| map_api_error(e, "service point"))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("service point upsert returned no row".to_string()))
    }
}

#[async_trait]
impl TicketRepository for SupabaseStore {
    async fn issue_ticket(&self, draft: TicketDraft) -> Result<QueueTicket, StoreError> {
        self.rpc(
            "issue_queue_ticket",
            json!({
                "p_appointment_id": draft.appointment_id,
                "p_branch_id": draft.branch_id,
                "p_service_point_id": draft.service_point_id,
                "p_queue_date": draft.queue_date,
                "p_issued_at": ts(draft.issued_at),
            }),
        )
        .await
    }

    async fn find_ticket(&self, id: i64) -> Result<Option<QueueTicket>, StoreError> {
        let path = format!("/rest/v1/queue_tickets?id=eq.{}&limit=1", id);
        self.first_row(&path, "queue ticket").await
    }

    async fn find_ticket_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<QueueTicket>, StoreError> {
        let path = format!("/rest/v1/queue_tickets?appointment_id=eq.{}&limit=1", appointment_id);
        self.first_row(&path, "queue ticket").await
    }

    async fn update_ticket_if_status(
        &self,
        ticket: QueueTicket,
        expected_status: TicketStatus,
    ) -> Result<QueueTicket, StoreError> {
        let path = format!(
            "/rest/v1/queue_tickets?id=eq.{}&status=eq.{}",
            ticket.id, expected_status
        );
        let context = format!("queue ticket {}", ticket.id);
        let rows: Vec<QueueTicket> = self
            .write_rows(Method::PATCH, &path, insert_body(&ticket)?, &context)
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| {
                StoreError::Conflict(format!("{} is no longer {}", context, expected_status))
            })
    }

    async fn list_tickets(
        &self,
        branch_id: i64,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTicket>, StoreError> {
        let path = format!(
            "/rest/v1/queue_tickets?branch_id=eq.{}&queue_date=eq.{}&order=ticket_number.asc",
            branch_id, queue_date
        );
        self.get_rows(&path, "queue tickets").await
    }
}

#[async_trait]
impl ReminderRepository for SupabaseStore {
    async fn claim_reminder(
        &self,
        appointment_id: i64,
        offset_hours: u32,
        expected_send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReminderRecord>, StoreError> {
        self.rpc(
            "claim_reminder",
            json!({
                "p_appointment_id": appointment_id,
                "p_offset_hours": offset_hours,
                "p_expected_send_at": ts(expected_send_at),
                "p_now": ts(now),
                "p_tolerance_minutes": REMINDER_TOLERANCE_MINUTES,
                "p_pending_timeout_minutes": PENDING_CLAIM_TIMEOUT_MINUTES,
            }),
        )
        .await
    }

    async fn mark_reminder_sent(
        &self,
        id: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError> {
        let path = pending_reminder_path(id);
        let body = json!({
            "status": ReminderStatus::Sent,
            "sent_at": ts(sent_at),
            "error_message": Value::Null,
            "updated_at": ts(sent_at),
        });
        let rows: Vec<ReminderRecord> =
            self.write_rows(Method::PATCH, &path, body, "reminder").await?;
        self.pending_update_result(id, rows).await
    }

    async fn mark_reminder_failed(
        &self,
        id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<ReminderRecord, StoreError> {
        let path = pending_reminder_path(id);
        let body = json!({
            "status": ReminderStatus::Failed,
            "error_message": error,
            "updated_at": ts(at),
        });
        let rows: Vec<ReminderRecord> =
            self.write_rows(Method::PATCH, &path, body, "reminder").await?;
        self.pending_update_result(id, rows).await
    }

    async fn release_reminder(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let body = json!({
            "status": ReminderStatus::Cancelled,
            "updated_at": ts(at),
        });
        let rows: Vec<ReminderRecord> = self
            .write_rows(Method::PATCH, &pending_reminder_path(id), body, "reminder")
            .await?;
        Ok(!rows.is_empty())
    }

    async fn cancel_pending_reminders(
        &self,
        appointment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let path = format!(
            "/rest/v1/appointment_reminders?appointment_id=eq.{}&status=eq.{}",
            appointment_id,
            ReminderStatus::Pending
        );
        let body = json!({
            "status": ReminderStatus::Cancelled,
            "updated_at": ts(at),
        });
        let rows: Vec<ReminderRecord> =
            self.write_rows(Method::PATCH, &path, body, "reminders").await?;
        if !rows.is_empty() {
            warn!(
                "Cancelled {} pending reminder(s) for appointment {}",
                rows.len(),
                appointment_id
            );
        }
        Ok(rows.len())
    }

    async fn list_reminders(&self, appointment_id: i64) -> Result<Vec<ReminderRecord>, StoreError> {
        let path = format!(
            "/rest/v1/appointment_reminders?appointment_id=eq.{}&order=created_at.asc",
            appointment_id
        );
        self.get_rows(&path, "reminders").await
    }
}
