//! Stateless booking rules.
//!
//! Every function takes `now` explicitly and performs no I/O, so the same
//! inputs always give the same answer.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use shared_models::auth::ActorRole;
use shared_models::error::ErrorCode;
use shared_models::BranchPolicy;

use crate::models::ValidationResult;

fn hours(h: u32) -> Duration {
    Duration::hours(i64::from(h))
}

pub fn validate_booking(
    now: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    policy: &BranchPolicy,
) -> ValidationResult {
    if scheduled_at <= now {
        return ValidationResult::fail(
            ErrorCode::PastDate,
            "Appointments must be booked in the future",
        );
    }

    let latest = now + Duration::days(i64::from(policy.max_advance_booking_days));
    if scheduled_at > latest {
        return ValidationResult::fail(
            ErrorCode::ExceedsMaxAdvance,
            format!(
                "Appointments can be booked at most {} days in advance",
                policy.max_advance_booking_days
            ),
        );
    }

    ValidationResult::ok()
}

/// Admins may cancel anything, including appointments already in the past.
pub fn validate_cancellation(
    now: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    policy: &BranchPolicy,
    role: ActorRole,
) -> ValidationResult {
    if role.is_admin() {
        debug!("Admin override for cancellation of appointment at {}", scheduled_at);
        return ValidationResult::ok();
    }

    if scheduled_at <= now {
        return ValidationResult::fail(
            ErrorCode::PastAppointment,
            "Past appointments cannot be cancelled",
        );
    }

    if scheduled_at - now < hours(policy.cancellation_hours) {
        return ValidationResult::fail(
            ErrorCode::InsufficientCancellationTime,
            format!(
                "Appointments must be cancelled at least {} hours in advance",
                policy.cancellation_hours
            ),
        );
    }

    ValidationResult::ok()
}

/// Admins skip every timing and count rule, but the new date must still be
/// bookable.
pub fn validate_reschedule(
    now: DateTime<Utc>,
    current_scheduled_at: DateTime<Utc>,
    new_scheduled_at: DateTime<Utc>,
    policy: &BranchPolicy,
    reschedule_count: u32,
    role: ActorRole,
) -> ValidationResult {
    if role.is_admin() {
        return validate_booking(now, new_scheduled_at, policy);
    }

    if current_scheduled_at <= now {
        return ValidationResult::fail(
            ErrorCode::PastAppointment,
            "Past appointments cannot be rescheduled",
        );
    }

    let limit = hours(policy.reschedule_time_limit_hours);

    if new_scheduled_at < now + limit {
        return ValidationResult::fail(
            ErrorCode::InsufficientRescheduleTime,
            format!(
                "The new time must be at least {} hours from now",
                policy.reschedule_time_limit_hours
            ),
        );
    }

    if current_scheduled_at - now < limit {
        return ValidationResult::fail(
            ErrorCode::TooLateToReschedule,
            format!(
                "Appointments starting within {} hours can no longer be rescheduled",
                policy.reschedule_time_limit_hours
            ),
        );
    }

    if reschedule_count >= policy.max_reschedules {
        return ValidationResult::fail(
            ErrorCode::MaxReschedulesExceeded,
            format!(
                "This appointment has already been rescheduled {} times",
                reschedule_count
            ),
        );
    }

    validate_booking(now, new_scheduled_at, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 10, 12, 0, 0).unwrap()
    }

    fn code(result: ValidationResult) -> Option<ErrorCode> {
        result.error_code
    }

    #[test]
    fn booking_respects_advance_limit() {
        let policy = BranchPolicy::defaults(1);
        let days = Duration::days(i64::from(policy.max_advance_booking_days));

        assert_eq!(
            code(validate_booking(now(), now() + days + Duration::hours(1), &policy)),
            Some(ErrorCode::ExceedsMaxAdvance)
        );
        assert!(validate_booking(now(), now() + days - Duration::hours(1), &policy).valid);
        assert!(validate_booking(now(), now() + days, &policy).valid);
    }

    #[test]
    fn booking_rejects_now_and_past() {
        let policy = BranchPolicy::defaults(1);
        assert_eq!(code(validate_booking(now(), now(), &policy)), Some(ErrorCode::PastDate));
        assert_eq!(
            code(validate_booking(now(), now() - Duration::minutes(1), &policy)),
            Some(ErrorCode::PastDate)
        );
    }

    #[test]
    fn cancellation_window() {
        let policy = BranchPolicy::defaults(1);
        let day_ahead = now() + Duration::hours(24);
        assert!(validate_cancellation(now(), day_ahead, &policy, ActorRole::User).valid);
        assert_eq!(
            code(validate_cancellation(
                now(),
                now() + Duration::hours(23) + Duration::minutes(59),
                &policy,
                ActorRole::User
            )),
            Some(ErrorCode::InsufficientCancellationTime)
        );
        // Staff do not get the admin override.
        assert_eq!(
            code(validate_cancellation(
                now(),
                now() + Duration::hours(1),
                &policy,
                ActorRole::Staff
            )),
            Some(ErrorCode::InsufficientCancellationTime)
        );
    }

    #[test]
    fn admin_bypasses_past_checks() {
        let policy = BranchPolicy::defaults(1);
        let past = now() - Duration::hours(3);
        let tomorrow = now() + Duration::days(1);

        assert!(validate_cancellation(now(), past, &policy, ActorRole::Admin).valid);
        assert!(validate_reschedule(now(), past, tomorrow, &policy, 99, ActorRole::Admin).valid);

        assert_eq!(
            code(validate_cancellation(now(), past, &policy, ActorRole::User)),
            Some(ErrorCode::PastAppointment)
        );
        assert_eq!(
            code(validate_reschedule(now(), past, tomorrow, &policy, 0, ActorRole::User)),
            Some(ErrorCode::PastAppointment)
        );
    }

    #[test]
    fn admin_reschedule_still_needs_bookable_date() {
        let policy = BranchPolicy::defaults(1);
        let result = validate_reschedule(
            now(),
            now() + Duration::days(2),
            now() - Duration::hours(1),
            &policy,
            0,
            ActorRole::Admin,
        );
        assert_eq!(code(result), Some(ErrorCode::PastDate));
    }

    #[test]
    fn reschedule_rules_in_order() {
        let policy = BranchPolicy::defaults(1);
        let current = now() + Duration::days(3);
        let user = ActorRole::User;
        let moving_to = |target, count| {
            validate_reschedule(now(), current, target, &policy, count, user)
        };

        assert_eq!(
            code(moving_to(now() + Duration::hours(5), 0)),
            Some(ErrorCode::InsufficientRescheduleTime)
        );
        assert_eq!(
            code(validate_reschedule(
                now(),
                now() + Duration::hours(10),
                now() + Duration::days(2),
                &policy,
                0,
                ActorRole::User
            )),
            Some(ErrorCode::TooLateToReschedule)
        );
        assert_eq!(
            code(moving_to(now() + Duration::days(4), 3)),
            Some(ErrorCode::MaxReschedulesExceeded)
        );
        assert_eq!(
            code(moving_to(now() + Duration::days(45), 0)),
            Some(ErrorCode::ExceedsMaxAdvance)
        );
        assert!(moving_to(now() + Duration::days(4), 2).valid);
    }
}
