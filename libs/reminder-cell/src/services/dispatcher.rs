//! One pass over every branch with reminders enabled.
//!
//! For an offset `h` the pass picks `scheduled` appointments starting inside
//! `[now + h - 30m, now + h + 30m]`. The store claim on
//! `(appointment, offset)` is what keeps two overlapping passes from sending
//! the same reminder twice. The appointment is read again after the claim so
//! a cancellation or reschedule landing mid-pass withdraws the reminder.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use appointment_cell::PolicyService;
use shared_database::{AppointmentRepository, ReminderRepository, Repositories, StoreError};
use shared_models::{
    reminder_tolerance, Appointment, AppointmentFilter, AppointmentStatus, BranchPolicy,
};
use shared_utils::Clock;

use crate::error::ReminderError;
use crate::models::DispatchSummary;
use crate::services::sender::NotificationSender;
use crate::services::template;

enum Outcome {
    Sent,
    AlreadyHandled,
    Withdrawn,
}

pub struct ReminderDispatcher {
    appointments: Arc<dyn AppointmentRepository>,
    reminders: Arc<dyn ReminderRepository>,
    policies: Arc<PolicyService>,
    sender: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
}

impl ReminderDispatcher {
    pub fn new(
        repos: &Repositories,
        policies: Arc<PolicyService>,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            appointments: repos.appointments.clone(),
            reminders: repos.reminders.clone(),
            policies,
            sender,
            clock,
        }
    }

    #[instrument(skip(self))]
    pub async fn dispatch(
        &self,
        send_delay: StdDuration,
    ) -> Result<DispatchSummary, ReminderError> {
        let now = self.clock.now();
        let mut summary = DispatchSummary::default();

        let branch_ids = self.appointments.list_scheduled_branch_ids(now).await?;
        debug!("Reminder pass at {} over {} branches", now, branch_ids.len());

        for branch_id in branch_ids {
            let policy = self.policies.get(branch_id).await;
            if !policy.reminders_enabled || !policy.is_active {
                debug!("Reminders off for branch {}", branch_id);
                continue;
            }
            summary.branches_checked += 1;

            for &offset in &policy.reminder_offsets_hours {
                self.dispatch_offset(&policy, offset, now, send_delay, &mut summary).await;
            }
        }

        info!(
            "Reminder pass done: {} sent, {} skipped, {} errors across {} branches",
            summary.sent, summary.skipped, summary.errors, summary.branches_checked
        );
        Ok(summary)
    }

    async fn dispatch_offset(
        &self,
        policy: &BranchPolicy,
        offset_hours: u32,
        now: DateTime<Utc>,
        send_delay: StdDuration,
        summary: &mut DispatchSummary,
    ) {
        let center = now + Duration::hours(i64::from(offset_hours));
        let filter = AppointmentFilter {
            branch_id: Some(policy.branch_id),
            status: Some(AppointmentStatus::Scheduled),
            from: Some(center - reminder_tolerance()),
            to: Some(center + reminder_tolerance()),
            ..Default::default()
        };

        let candidates = match self.appointments.list_appointments(filter).await {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    "Could not list reminder candidates for branch {} ({}h): {}",
                    policy.branch_id, offset_hours, e
                );
                summary.errors += 1;
                return;
            }
        };

        for appointment in candidates {
            summary.candidates += 1;
            match self.remind(policy, &appointment, offset_hours, now).await {
                Ok(Outcome::Sent) => {
                    summary.sent += 1;
                    if !send_delay.is_zero() {
                        tokio::time::sleep(send_delay).await;
                    }
                }
                Ok(Outcome::AlreadyHandled) | Ok(Outcome::Withdrawn) => summary.skipped += 1,
                Err(ReminderError::NoRecipient) => {
                    debug!("Appointment {} has no email, no reminder sent", appointment.id);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        "Reminder for appointment {} ({}h) failed: {}",
                        appointment.id, offset_hours, e
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    async fn remind(
        &self,
        policy: &BranchPolicy,
        appointment: &Appointment,
        offset_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReminderError> {
        let to = appointment
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(ReminderError::NoRecipient)?;

        let expected_send_at = appointment.scheduled_at - Duration::hours(i64::from(offset_hours));
        let Some(claim) = self
            .reminders
            .claim_reminder(appointment.id, offset_hours, expected_send_at, now)
            .await?
        else {
            return Ok(Outcome::AlreadyHandled);
        };

        let current = match self.appointments.find_appointment(appointment.id).await? {
            Some(current)
                if current.status == AppointmentStatus::Scheduled
                    && current.scheduled_at == appointment.scheduled_at =>
            {
                current
            }
            _ => {
                debug!(
                    "Appointment {} changed before its {}h reminder went out",
                    appointment.id, offset_hours
                );
                self.reminders.release_reminder(claim.id, self.clock.now()).await?;
                return Ok(Outcome::Withdrawn);
            }
        };

        let message = template::render(policy, &current, to, offset_hours);
        match self.sender.send(&message.to, &message.subject, &message.html_body).await {
            Ok(()) => {
                match self.reminders.mark_reminder_sent(claim.id, self.clock.now()).await {
                    Ok(_) => debug!(
                        "Sent {}h reminder for appointment {}",
                        offset_hours, appointment.id
                    ),
                    Err(StoreError::Conflict(msg)) => warn!(
                        "Reminder {} for appointment {} was withdrawn while sending: {}",
                        claim.id, appointment.id, msg
                    ),
                    Err(e) => return Err(e.into()),
                }
                Ok(Outcome::Sent)
            }
            Err(e) => {
                match self
                    .reminders
                    .mark_reminder_failed(claim.id, &e.to_string(), self.clock.now())
                    .await
                {
                    Ok(_) => {}
                    Err(StoreError::Conflict(msg)) => {
                        debug!("Reminder {} no longer pending: {}", claim.id, msg)
                    }
                    Err(store_err) => return Err(store_err.into()),
                }
                Err(e)
            }
        }
    }
}
