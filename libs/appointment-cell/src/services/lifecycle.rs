use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use shared_models::{Appointment, AppointmentStatus};

use crate::error::AppointmentError;

/// The single owner of the appointment transition graph.
///
/// ```text
/// scheduled ──► checked-in ──► completed
///     │              │
///     ├──► no-show   └──► cancelled
///     └──► cancelled
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentStateMachine;

impl AppointmentStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn valid_transitions(&self, from: AppointmentStatus) -> &'static [AppointmentStatus] {
        match from {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::CheckedIn,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::CheckedIn => {
                &[AppointmentStatus::Completed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => &[],
        }
    }

    pub fn can_transition(&self, from: AppointmentStatus, to: AppointmentStatus) -> bool {
        self.valid_transitions(from).contains(&to)
    }

    pub fn validate_transition(
        &self,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if self.can_transition(from, to) {
            debug!("Status transition allowed: {} -> {}", from, to);
            return Ok(());
        }
        warn!("Illegal status transition attempted: {} -> {}", from, to);
        Err(AppointmentError::IllegalTransition { from, to })
    }

    /// Rescheduling keeps the status and only ever applies to `scheduled`.
    pub fn validate_reschedulable(
        &self,
        status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if status == AppointmentStatus::Scheduled {
            Ok(())
        } else {
            Err(AppointmentError::NotReschedulable { status })
        }
    }

    /// Returns the appointment as it looks after the transition, with the
    /// timestamps for the target status stamped. Does not persist.
    pub fn transition(
        &self,
        appointment: &Appointment,
        to: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        self.validate_transition(appointment.status, to)?;

        let mut next = appointment.clone();
        next.status = to;
        next.updated_at = now;
        match to {
            AppointmentStatus::CheckedIn => next.attended_at = Some(now),
            AppointmentStatus::Cancelled => next.cancelled_at = Some(now),
            AppointmentStatus::NoShow => next.no_show_marked_at = Some(now),
            AppointmentStatus::Completed | AppointmentStatus::Scheduled => {}
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_models::NewAppointment;

    fn appointment(status: AppointmentStatus) -> Appointment {
        let now = Utc::now();
        let mut appointment = NewAppointment {
            branch_id: 1,
            service_id: 1,
            customer_id: None,
            customer_name: "Lin".to_string(),
            customer_email: None,
            scheduled_at: now,
            confirmation_code: "CODE0001".to_string(),
            notes: None,
            created_at: now,
        }
        .into_appointment(1);
        appointment.status = status;
        appointment
    }

    #[test]
    fn every_pair_outside_the_graph_is_rejected() {
        let machine = AppointmentStateMachine::new();
        let allowed = [
            (AppointmentStatus::Scheduled, AppointmentStatus::CheckedIn),
            (AppointmentStatus::Scheduled, AppointmentStatus::Cancelled),
            (AppointmentStatus::Scheduled, AppointmentStatus::NoShow),
            (AppointmentStatus::CheckedIn, AppointmentStatus::Completed),
            (AppointmentStatus::CheckedIn, AppointmentStatus::Cancelled),
        ];

        for from in AppointmentStatus::ALL {
            for to in AppointmentStatus::ALL {
                let current = appointment(from);
                let result = machine.transition(&current, to, Utc::now());
                if allowed.contains(&(from, to)) {
                    assert_eq!(result.unwrap().status, to);
                } else {
                    assert_matches!(
                        result,
                        Err(AppointmentError::IllegalTransition { from: f, to: t })
                            if f == from && t == to
                    );
                    assert_eq!(current.status, from);
                }
            }
        }
    }

    #[test]
    fn transition_stamps_timestamps() {
        let machine = AppointmentStateMachine::new();
        let now = Utc::now();

        let checked_in = machine
            .transition(
                &appointment(AppointmentStatus::Scheduled),
                AppointmentStatus::CheckedIn,
                now,
            )
            .unwrap();
        assert_eq!(checked_in.attended_at, Some(now));

        let no_show = machine
            .transition(&appointment(AppointmentStatus::Scheduled), AppointmentStatus::NoShow, now)
            .unwrap();
        assert_eq!(no_show.no_show_marked_at, Some(now));
        assert!(!no_show.auto_marked_as_no_show);
    }

    #[test]
    fn only_scheduled_can_be_rescheduled() {
        let machine = AppointmentStateMachine::new();
        assert!(machine.validate_reschedulable(AppointmentStatus::Scheduled).is_ok());
        for status in [
            AppointmentStatus::CheckedIn,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert_matches!(
                machine.validate_reschedulable(status),
                Err(AppointmentError::NotReschedulable { .. })
            );
        }
    }
}
