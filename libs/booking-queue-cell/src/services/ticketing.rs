//! Queue ticket issuance and progression.
//!
//! Ticket numbers are assigned by the store inside `issue_ticket`, which is
//! the one serialization point for concurrent check-ins at a branch.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use appointment_cell::AppointmentService;
use shared_database::{
    AppointmentGuard, AppointmentRepository, Repositories, ServicePointRepository, StoreError,
    TicketRepository,
};
use shared_models::{
    Appointment, AppointmentStatus, QueueTicket, ServicePoint, TicketDraft, TicketStatus,
};
use shared_utils::Clock;

use crate::error::QueueError;
use crate::models::QueueStats;

pub struct QueueTicketingService {
    tickets: Arc<dyn TicketRepository>,
    service_points: Arc<dyn ServicePointRepository>,
    appointment_store: Arc<dyn AppointmentRepository>,
    appointments: Arc<AppointmentService>,
    clock: Arc<dyn Clock>,
}

impl QueueTicketingService {
    pub fn new(
        repos: &Repositories,
        appointments: Arc<AppointmentService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets: repos.tickets.clone(),
            service_points: repos.service_points.clone(),
            appointment_store: repos.appointments.clone(),
            appointments,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Binds a checked-in appointment to a service point, completes it and
    /// hands out the next ticket number for the branch and day.
    #[instrument(skip(self))]
    pub async fn issue_ticket(
        &self,
        appointment_id: i64,
        service_point_id: i64,
    ) -> Result<QueueTicket, QueueError> {
        let appointment = self.appointments.get(appointment_id).await?;

        if self.tickets.find_ticket_by_appointment(appointment_id).await?.is_some() {
            return Err(QueueError::DuplicateTicket(appointment_id));
        }

        self.appointments
            .state_machine()
            .validate_transition(appointment.status, AppointmentStatus::Completed)?;

        self.require_capable(service_point_id, &appointment).await?;

        let completed = self
            .appointments
            .apply_transition(&appointment, AppointmentStatus::Completed, |a| {
                a.service_point_id = Some(service_point_id);
            })
            .await?;

        let now = self.clock.now();
        let draft = TicketDraft {
            appointment_id,
            branch_id: appointment.branch_id,
            service_point_id,
            queue_date: now.date_naive(),
            issued_at: now,
        };

        match self.tickets.issue_ticket(draft).await {
            Ok(ticket) => {
                info!(
                    "Issued ticket #{} for appointment {} at service point {}",
                    ticket.ticket_number, appointment_id, service_point_id
                );
                Ok(ticket)
            }
            Err(e) => {
                self.restore_appointment(appointment, completed).await;
                match e {
                    StoreError::Duplicate(_) => Err(QueueError::DuplicateTicket(appointment_id)),
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Puts the appointment back to where it was when the ticket could not be
    /// issued after the appointment had already been completed.
    async fn restore_appointment(&self, original: Appointment, completed: Appointment) {
        let id = original.id;
        if let Err(e) = self
            .appointment_store
            .update_appointment_guarded(original, AppointmentGuard::of(&completed))
            .await
        {
            error!("Failed to restore appointment {} after ticket failure: {}", id, e);
        } else {
            warn!("Restored appointment {} after ticket issuance failed", id);
        }
    }

    async fn require_capable(
        &self,
        service_point_id: i64,
        appointment: &Appointment,
    ) -> Result<ServicePoint, QueueError> {
        let point = self
            .service_points
            .find_service_point(service_point_id)
            .await?
            .ok_or(QueueError::ServicePointNotFound(service_point_id))?;

        if !point.is_active {
            return Err(QueueError::ServicePointInactive(service_point_id));
        }
        if point.branch_id != appointment.branch_id || !point.can_serve(appointment.service_id) {
            return Err(QueueError::ServicePointIncapable {
                service_point_id,
                service_id: appointment.service_id,
            });
        }
        Ok(point)
    }

    async fn get_ticket(&self, ticket_id: i64) -> Result<QueueTicket, QueueError> {
        self.tickets
            .find_ticket(ticket_id)
            .await?
            .ok_or(QueueError::TicketNotFound(ticket_id))
    }

    async fn save_if_status(
        &self,
        next: QueueTicket,
        expected: TicketStatus,
        attempted: TicketStatus,
    ) -> Result<QueueTicket, QueueError> {
        let id = next.id;
        match self.tickets.update_ticket_if_status(next, expected).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::Conflict(msg)) => {
                debug!("Lost status race on ticket {}: {}", id, msg);
                let actual = self.get_ticket(id).await?.status;
                Err(QueueError::InvalidStatusTransition {
                    from: actual,
                    to: attempted,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `waiting -> serving` stamps `called_at`; `serving -> complete` stamps
    /// `completed_at` and makes sure the appointment is completed.
    #[instrument(skip(self))]
    pub async fn advance_status(
        &self,
        ticket_id: i64,
        new_status: TicketStatus,
    ) -> Result<QueueTicket, QueueError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if !ticket.status.can_transition_to(&new_status) {
            return Err(QueueError::InvalidStatusTransition {
                from: ticket.status,
                to: new_status,
            });
        }

        let now = self.clock.now();
        let mut next = ticket.clone();
        next.status = new_status;
        match new_status {
            TicketStatus::Serving => next.called_at = Some(now),
            TicketStatus::Complete => next.completed_at = Some(now),
            TicketStatus::Waiting => {}
        }

        let saved = self.save_if_status(next, ticket.status, new_status).await?;
        info!("Ticket {} moved {} -> {}", ticket_id, ticket.status, new_status);

        if new_status == TicketStatus::Complete {
            self.complete_appointment(saved.appointment_id).await?;
        }
        Ok(saved)
    }

    async fn complete_appointment(&self, appointment_id: i64) -> Result<(), QueueError> {
        let appointment = self.appointments.get(appointment_id).await?;
        match appointment.status {
            AppointmentStatus::Completed => Ok(()),
            AppointmentStatus::CheckedIn => {
                self.appointments
                    .apply_transition(&appointment, AppointmentStatus::Completed, |_| {})
                    .await?;
                Ok(())
            }
            other => {
                warn!(
                    "Ticket for appointment {} completed while the appointment is {}",
                    appointment_id, other
                );
                Ok(())
            }
        }
    }

    /// Moves the ticket to another capable service point. Number and status
    /// stay as they are.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        ticket_id: i64,
        new_service_point_id: i64,
    ) -> Result<QueueTicket, QueueError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if ticket.status == TicketStatus::Complete {
            return Err(QueueError::TicketClosed(ticket_id));
        }

        let appointment = self.appointments.get(ticket.appointment_id).await?;
        self.require_capable(new_service_point_id, &appointment).await?;

        let mut next = ticket.clone();
        next.service_point_id = new_service_point_id;
        let saved = self.save_if_status(next, ticket.status, ticket.status).await?;

        let mut rebound = appointment.clone();
        rebound.service_point_id = Some(new_service_point_id);
        rebound.updated_at = self.clock.now();
        if let Err(e) = self
            .appointment_store
            .update_appointment_guarded(rebound, AppointmentGuard::of(&appointment))
            .await
        {
            warn!(
                "Ticket {} transferred but appointment {} kept its old service point: {}",
                ticket_id, appointment.id, e
            );
        }

        info!(
            "Ticket {} transferred from service point {} to {}",
            ticket_id, ticket.service_point_id, new_service_point_id
        );
        Ok(saved)
    }

    pub async fn list_queue(
        &self,
        branch_id: i64,
        queue_date: NaiveDate,
    ) -> Result<Vec<QueueTicket>, QueueError> {
        Ok(self.tickets.list_tickets(branch_id, queue_date).await?)
    }

    pub async fn queue_stats(
        &self,
        branch_id: i64,
        queue_date: NaiveDate,
    ) -> Result<QueueStats, QueueError> {
        let tickets = self.list_queue(branch_id, queue_date).await?;

        let count = |status: TicketStatus| tickets.iter().filter(|t| t.status == status).count();
        let waits: Vec<f64> = tickets
            .iter()
            .filter_map(|t| {
                t.called_at
                    .map(|called| (called - t.issued_at).num_seconds() as f64 / 60.0)
            })
            .collect();
        let average_wait_minutes = if waits.is_empty() {
            None
        } else {
            Some(waits.iter().sum::<f64>() / waits.len() as f64)
        };

        Ok(QueueStats {
            branch_id,
            queue_date,
            waiting: count(TicketStatus::Waiting),
            serving: count(TicketStatus::Serving),
            complete: count(TicketStatus::Complete),
            total: tickets.len(),
            average_wait_minutes,
        })
    }
}
