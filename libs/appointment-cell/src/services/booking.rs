use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::{
    AppointmentGuard, AppointmentRepository, Repositories, ReminderRepository,
    RescheduleRepository, ServicePointRepository, StoreError,
};
use shared_models::auth::{Actor, ActorRole};
use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, NewAppointment, RescheduleRecord,
};
use shared_utils::Clock;

use crate::error::AppointmentError;
use crate::models::{BookAppointmentRequest, NoShowSweepSummary};
use crate::services::lifecycle::AppointmentStateMachine;
use crate::services::policy::PolicyService;
use crate::services::validator;

const CONFIRMATION_CODE_LEN: usize = 8;
const MAX_CODE_ATTEMPTS: usize = 5;
/// Attempts for a write that keeps losing to concurrent writers.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct AppointmentService {
    appointments: Arc<dyn AppointmentRepository>,
    reschedules: Arc<dyn RescheduleRepository>,
    service_points: Arc<dyn ServicePointRepository>,
    reminders: Arc<dyn ReminderRepository>,
    policies: Arc<PolicyService>,
    state_machine: AppointmentStateMachine,
    clock: Arc<dyn Clock>,
    no_show_grace: Duration,
}

fn generate_confirmation_code() -> String {
    Uuid::new_v4().simple().to_string()[..CONFIRMATION_CODE_LEN].to_uppercase()
}

impl AppointmentService {
    pub fn new(
        repos: &Repositories,
        policies: Arc<PolicyService>,
        clock: Arc<dyn Clock>,
        no_show_grace_minutes: i64,
    ) -> Self {
        Self {
            appointments: repos.appointments.clone(),
            reschedules: repos.reschedules.clone(),
            service_points: repos.service_points.clone(),
            reminders: repos.reminders.clone(),
            policies,
            state_machine: AppointmentStateMachine::new(),
            clock,
            no_show_grace: Duration::minutes(no_show_grace_minutes),
        }
    }

    pub fn state_machine(&self) -> &AppointmentStateMachine {
        &self.state_machine
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(
        skip(self, request),
        fields(branch_id = request.branch_id, service_id = request.service_id)
    )]
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        actor: &Actor,
    ) -> Result<Appointment, AppointmentError> {
        if request.customer_name.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest("customer_name is required".to_string()));
        }

        let now = self.clock.now();
        let policy = self.policies.get(request.branch_id).await;
        validator::validate_booking(now, request.scheduled_at, &policy).into_result()?;

        let capacity = self
            .slot_capacity(request.branch_id, request.service_id)
            .await?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let new_appointment = NewAppointment {
                branch_id: request.branch_id,
                service_id: request.service_id,
                // Staff book on behalf of walk-in customers.
                customer_id: match actor.role {
                    ActorRole::User => actor.id.clone(),
                    _ => None,
                },
                customer_name: request.customer_name.trim().to_string(),
                customer_email: request.customer_email.clone(),
                scheduled_at: request.scheduled_at,
                confirmation_code: generate_confirmation_code(),
                notes: request.notes.clone(),
                created_at: now,
            };

            match self.appointments.create_appointment(new_appointment, capacity).await {
                Ok(appointment) => {
                    info!(
                        "Booked appointment {} ({}) at {}",
                        appointment.id, appointment.confirmation_code, appointment.scheduled_at
                    );
                    return Ok(appointment);
                }
                Err(StoreError::SlotFull(msg)) => {
                    debug!("Slot unavailable: {}", msg);
                    return Err(AppointmentError::SlotUnavailable);
                }
                Err(StoreError::Duplicate(msg)) => {
                    warn!("Confirmation code clash on attempt {}: {}", attempt, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Backend("could not generate a unique confirmation code".to_string()).into())
    }

    /// Number of active service points in the branch able to serve the
    /// service. Each one can hold one appointment per start time.
    async fn slot_capacity(
        &self,
        branch_id: i64,
        service_id: i64,
    ) -> Result<usize, AppointmentError> {
        let capacity = self
            .service_points
            .list_service_points(branch_id)
            .await?
            .iter()
            .filter(|p| p.is_active && p.can_serve(service_id))
            .count();

        if capacity == 0 {
            return Err(AppointmentError::NoCapableServicePoint { branch_id, service_id });
        }
        Ok(capacity)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get(&self, id: i64) -> Result<Appointment, AppointmentError> {
        self.appointments
            .find_appointment(id)
            .await?
            .ok_or(AppointmentError::NotFound(id))
    }

    pub async fn find_by_confirmation_code(
        &self,
        code: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.find_by_confirmation_code(code).await?)
    }

    pub async fn list(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self.appointments.list_appointments(filter).await?)
    }

    pub async fn reschedule_history(
        &self,
        id: i64,
    ) -> Result<Vec<RescheduleRecord>, AppointmentError> {
        Ok(self.reschedules.list_reschedules(id).await?)
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    /// Runs `current -> to` through the state machine, lets `customize` touch
    /// up the result, and persists it only if the stored row is still the one
    /// `current` was read from.
    pub async fn apply_transition<F>(
        &self,
        current: &Appointment,
        to: AppointmentStatus,
        customize: F,
    ) -> Result<Appointment, AppointmentError>
    where
        F: FnOnce(&mut Appointment) + Send,
    {
        let mut next = self.state_machine.transition(current, to, self.clock.now())?;
        customize(&mut next);

        let guard = AppointmentGuard::of(current);
        match self.appointments.update_appointment_guarded(next, guard).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::Conflict(msg)) => {
                Err(self.lost_race(current.id, guard, to, &msg).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turns a failed guard into the error the caller should see: a status
    /// change by someone else is an illegal transition from the new status,
    /// anything else is retryable.
    async fn lost_race(
        &self,
        id: i64,
        guard: AppointmentGuard,
        attempted: AppointmentStatus,
        msg: &str,
    ) -> AppointmentError {
        debug!("Lost write race on appointment {}: {}", id, msg);
        match self.get(id).await {
            Ok(actual) if actual.status != guard.status => AppointmentError::IllegalTransition {
                from: actual.status,
                to: attempted,
            },
            Ok(_) => AppointmentError::ConcurrentUpdate(id),
            Err(e) => e,
        }
    }

    /// Re-runs `attempt` while it keeps losing to concurrent writers. Each run
    /// reads the appointment afresh, so every rule is checked against the
    /// latest row.
    async fn retrying<T, F, Fut>(&self, mut attempt: F) -> Result<T, AppointmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(AppointmentError::ConcurrentUpdate(id)) if tries < MAX_WRITE_ATTEMPTS => {
                    debug!("Retrying write on appointment {} (attempt {})", id, tries + 1);
                    tries += 1;
                }
                other => return other,
            }
        }
    }

    #[instrument(skip(self, actor, reason))]
    pub async fn cancel(
        &self,
        id: i64,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let cancelled = self
            .retrying(move || self.try_cancel(id, actor, reason.clone()))
            .await?;

        info!("Appointment {} cancelled by {}", id, actor.role);
        self.cancel_pending_reminders(id).await;
        Ok(cancelled)
    }

    async fn try_cancel(
        &self,
        id: i64,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get(id).await?;
        self.state_machine
            .validate_transition(current.status, AppointmentStatus::Cancelled)?;

        let policy = self.policies.get(current.branch_id).await;
        validator::validate_cancellation(
            self.clock.now(),
            current.scheduled_at,
            &policy,
            actor.role,
        )
        .into_result()?;

        self.apply_transition(&current, AppointmentStatus::Cancelled, |a| {
            a.cancellation_reason = reason;
        })
        .await
    }

    #[instrument(skip(self, actor, reason))]
    pub async fn reschedule(
        &self,
        id: i64,
        new_scheduled_at: DateTime<Utc>,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let (previous, saved) = self
            .retrying(move || self.try_reschedule(id, new_scheduled_at, actor, reason.clone()))
            .await?;

        info!(
            "Appointment {} moved from {} to {} (reschedule #{})",
            id, previous, new_scheduled_at, saved.reschedule_count
        );
        self.cancel_pending_reminders(id).await;
        Ok(saved)
    }

    /// One guarded reschedule. The count checked against the policy, the
    /// slot capacity and the history row all go through the same atomic store
    /// write, so concurrent callers cannot push the appointment past its limit
    /// or into a full slot.
    async fn try_reschedule(
        &self,
        id: i64,
        new_scheduled_at: DateTime<Utc>,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<(DateTime<Utc>, Appointment), AppointmentError> {
        let current = self.get(id).await?;
        self.state_machine.validate_reschedulable(current.status)?;

        let now = self.clock.now();
        let policy = self.policies.get(current.branch_id).await;
        validator::validate_reschedule(
            now,
            current.scheduled_at,
            new_scheduled_at,
            &policy,
            current.reschedule_count,
            actor.role,
        )
        .into_result()?;

        let capacity = self
            .slot_capacity(current.branch_id, current.service_id)
            .await?;

        let mut next = current.clone();
        next.original_scheduled_at.get_or_insert(current.scheduled_at);
        next.scheduled_at = new_scheduled_at;
        next.reschedule_count = current.reschedule_count + 1;
        next.updated_at = now;

        let record = RescheduleRecord {
            id: 0,
            appointment_id: id,
            previous_scheduled_at: current.scheduled_at,
            new_scheduled_at,
            actor_id: actor.id.clone(),
            reason,
            created_at: now,
        };

        let guard = AppointmentGuard::of(&current);
        match self
            .appointments
            .reschedule_appointment(next, record, guard, capacity)
            .await
        {
            Ok(saved) => Ok((current.scheduled_at, saved)),
            Err(StoreError::SlotFull(msg)) => {
                debug!("Slot unavailable for reschedule: {}", msg);
                Err(AppointmentError::SlotUnavailable)
            }
            Err(StoreError::Conflict(msg)) => {
                // The next attempt re-reads and reports why the move is no
                // longer allowed.
                debug!("Lost reschedule race on appointment {}: {}", id, msg);
                Err(AppointmentError::ConcurrentUpdate(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn check_in(&self, id: i64) -> Result<Appointment, AppointmentError> {
        let checked_in = self
            .retrying(move || async move {
                let current = self.get(id).await?;
                self.apply_transition(&current, AppointmentStatus::CheckedIn, |_| {})
                    .await
            })
            .await?;
        info!("Appointment {} checked in", id);
        Ok(checked_in)
    }

    pub async fn mark_no_show(&self, id: i64) -> Result<Appointment, AppointmentError> {
        let marked = self
            .retrying(move || async move {
                let current = self.get(id).await?;
                self.apply_transition(&current, AppointmentStatus::NoShow, |a| {
                    a.auto_marked_as_no_show = false;
                })
                .await
            })
            .await?;
        info!("Appointment {} marked as no-show", id);
        self.cancel_pending_reminders(id).await;
        Ok(marked)
    }

    /// Moves every `scheduled` appointment whose start plus the grace period
    /// has passed to `no-show`.
    #[instrument(skip(self))]
    pub async fn mark_overdue_no_shows(
        &self,
        branch_id: Option<i64>,
    ) -> Result<NoShowSweepSummary, AppointmentError> {
        let cutoff = self.clock.now() - self.no_show_grace;
        let overdue: Vec<Appointment> = self
            .appointments
            .list_appointments(AppointmentFilter {
                branch_id,
                status: Some(AppointmentStatus::Scheduled),
                to: Some(cutoff),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|a| a.scheduled_at < cutoff)
            .collect();

        let mut summary = NoShowSweepSummary {
            examined: overdue.len(),
            ..Default::default()
        };

        for appointment in overdue {
            match self
                .apply_transition(&appointment, AppointmentStatus::NoShow, |a| {
                    a.auto_marked_as_no_show = true;
                })
                .await
            {
                Ok(_) => {
                    summary.marked += 1;
                    self.cancel_pending_reminders(appointment.id).await;
                }
                Err(AppointmentError::IllegalTransition { from, .. }) => {
                    debug!(
                        "Appointment {} became {} before the sweep reached it",
                        appointment.id, from
                    );
                    summary.skipped += 1;
                }
                Err(AppointmentError::ConcurrentUpdate(id)) => {
                    debug!("Appointment {} was rescheduled while the sweep ran", id);
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to mark appointment {} as no-show: {}", appointment.id, e);
                    summary.skipped += 1;
                }
            }
        }

        if summary.marked > 0 {
            info!(
                "No-show sweep marked {} of {} overdue appointments",
                summary.marked, summary.examined
            );
        }
        Ok(summary)
    }

    /// Best effort; a failure here is logged and never fails the caller.
    async fn cancel_pending_reminders(&self, appointment_id: i64) {
        match self
            .reminders
            .cancel_pending_reminders(appointment_id, self.clock.now())
            .await
        {
            Ok(0) => {}
            Ok(n) => debug!(
                "Cancelled {} pending reminder(s) for appointment {}",
                n, appointment_id
            ),
            Err(e) => warn!(
                "Failed to cancel pending reminders for appointment {}: {}",
                appointment_id, e
            ),
        }
    }
}
