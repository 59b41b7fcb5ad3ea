use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures::future::join_all;

use appointment_cell::PolicyService;
use shared_database::{InMemoryStore, PolicyRepository};
use shared_models::error::ErrorCode;
use shared_models::{
    PolicyUpdate, DEFAULT_CANCELLATION_HOURS, DEFAULT_MAX_ADVANCE_BOOKING_DAYS,
    DEFAULT_MAX_RESCHEDULES, DEFAULT_RESCHEDULE_TIME_LIMIT_HOURS,
};
use shared_utils::ManualClock;

fn service() -> (Arc<InMemoryStore>, PolicyService) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
    let service = PolicyService::new(store.clone(), clock);
    (store, service)
}

#[tokio::test]
async fn missing_policy_hydrates_defaults() {
    let (_, policies) = service();
    let policy = policies.get(42).await;

    assert_eq!(policy.id, 0);
    assert_eq!(policy.branch_id, 42);
    assert_eq!(policy.cancellation_hours, DEFAULT_CANCELLATION_HOURS);
    assert_eq!(policy.reschedule_time_limit_hours, DEFAULT_RESCHEDULE_TIME_LIMIT_HOURS);
    assert_eq!(policy.max_reschedules, DEFAULT_MAX_RESCHEDULES);
    assert_eq!(policy.max_advance_booking_days, DEFAULT_MAX_ADVANCE_BOOKING_DAYS);
    assert!(policy.reminders_enabled);
    assert_eq!(policy.reminder_offsets_hours, vec![24, 2]);
    assert!(!policy.emergency_mode);
    assert!(policy.is_active);
    assert_eq!(policy.version, 0);
}

#[tokio::test]
async fn upsert_merges_and_bumps_version() {
    let (_, policies) = service();

    let first = policies
        .upsert(
            7,
            PolicyUpdate {
                cancellation_hours: Some(12),
                ..Default::default()
            },
            Some("admin-1"),
        )
        .await
        .unwrap();
    assert!(first.is_persisted());
    assert_eq!(first.version, 1);
    assert_eq!(first.cancellation_hours, 12);
    assert_eq!(first.updated_by.as_deref(), Some("admin-1"));
    assert!(first.updated_at.is_some());

    let second = policies
        .upsert(
            7,
            PolicyUpdate {
                reminder_offsets_hours: Some(vec![1, 48, 1]),
                ..Default::default()
            },
            Some("admin-2"),
        )
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.version, 2);
    assert_eq!(second.cancellation_hours, 12);
    assert_eq!(second.reminder_offsets_hours, vec![48, 1]);
    assert_eq!(second.updated_by.as_deref(), Some("admin-2"));
}

#[tokio::test]
async fn invalid_updates_are_rejected() {
    let (store, policies) = service();

    let zero = policies
        .upsert(
            7,
            PolicyUpdate {
                max_reschedules: Some(0),
                ..Default::default()
            },
            None,
        )
        .await;
    assert_eq!(zero.unwrap_err().code(), ErrorCode::InvalidRequest);

    let too_many = policies
        .upsert(
            7,
            PolicyUpdate {
                reminder_offsets_hours: Some(vec![1, 2, 3, 4, 5, 6]),
                ..Default::default()
            },
            None,
        )
        .await;
    assert_eq!(too_many.unwrap_err().code(), ErrorCode::InvalidRequest);

    assert!(store.find_policy(7).await.unwrap().is_none());
}

#[tokio::test]
async fn emergency_toggle_creates_missing_record() {
    let (store, policies) = service();

    let policy = policies.toggle_emergency_mode(3, true, Some("staff-1")).await.unwrap();
    assert!(policy.emergency_mode);
    assert_eq!(policy.version, 1);
    assert_eq!(policy.max_reschedules, DEFAULT_MAX_RESCHEDULES);

    let stored = store.find_policy(3).await.unwrap().unwrap();
    assert!(stored.emergency_mode);

    let off = policies.toggle_emergency_mode(3, false, Some("staff-1")).await.unwrap();
    assert!(!off.emergency_mode);
    assert_eq!(off.version, 2);
}

#[tokio::test]
async fn concurrent_writers_all_land() {
    let (_, policies) = service();
    let policies = Arc::new(policies);

    let writes = (1..=3u32).map(|hours| {
        let policies = policies.clone();
        async move {
            policies
                .upsert(
                    9,
                    PolicyUpdate {
                        cancellation_hours: Some(hours),
                        ..Default::default()
                    },
                    None,
                )
                .await
        }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    assert_eq!(policies.get(9).await.version, 3);
}

#[tokio::test]
async fn reset_reverts_to_defaults() {
    let (_, policies) = service();
    policies
        .upsert(
            5,
            PolicyUpdate {
                max_advance_booking_days: Some(90),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert!(policies.reset(5).await.unwrap());
    let policy = policies.get(5).await;
    assert_eq!(policy.id, 0);
    assert_eq!(policy.max_advance_booking_days, DEFAULT_MAX_ADVANCE_BOOKING_DAYS);
    assert!(!policies.reset(5).await.unwrap());
}
