use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{
    AppointmentGuard, AppointmentRepository, PolicyRepository, ReminderRepository, StoreError,
    SupabaseClient, SupabaseStore, TicketRepository,
};
use shared_models::{Appointment, AppointmentStatus, BranchPolicy, RescheduleRecord, TicketDraft};

fn store_for(server: &MockServer) -> SupabaseStore {
    let config = AppConfig {
        supabase_url: server.uri(),
        supabase_anon_key: "anon-key".to_string(),
        ..AppConfig::default()
    };
    SupabaseStore::new(Arc::new(SupabaseClient::new(&config)), "anon-key")
}

fn appointment_json(status: &str) -> serde_json::Value {
    json!({
        "id": 11,
        "branch_id": 1,
        "service_id": 2,
        "service_point_id": null,
        "customer_id": null,
        "customer_name": "Ada",
        "customer_email": null,
        "scheduled_at": "2030-01-02T09:00:00Z",
        "original_scheduled_at": null,
        "status": status,
        "confirmation_code": "ABCD1234",
        "reschedule_count": 0,
        "notes": null,
        "attended_at": null,
        "no_show_marked_at": null,
        "auto_marked_as_no_show": false,
        "cancelled_at": null,
        "cancellation_reason": null,
        "created_at": "2030-01-01T09:00:00Z",
        "updated_at": "2030-01-01T09:00:00Z"
    })
}

#[tokio::test]
async fn find_policy_returns_none_for_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/branch_policies"))
        .and(query_param("branch_id", "eq.3"))
        .and(header("apikey", "anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert!(store.find_policy(3).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_policy_version_is_a_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/branch_policies"))
        .and(query_param("version", "eq.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let mut policy = BranchPolicy::defaults(3);
    policy.id = 8;
    policy.version = 5;
    let result = store.save_policy(policy, Some(4)).await;
    assert_matches!(result, Err(StoreError::Conflict(_)));
}

#[tokio::test]
async fn status_guarded_update_reports_current_status() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .and(query_param("reschedule_count", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.11"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([appointment_json("cancelled")])),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    let current: Appointment = serde_json::from_value(appointment_json("scheduled")).unwrap();
    let mut appointment = current.clone();
    appointment.status = AppointmentStatus::CheckedIn;

    let result = store
        .update_appointment_guarded(appointment, AppointmentGuard::of(&current))
        .await;
    assert_matches!(result, Err(StoreError::Conflict(msg)) if msg.contains("cancelled"));
}

fn reschedule_of(current: &Appointment) -> (Appointment, RescheduleRecord) {
    let target = Utc.with_ymd_and_hms(2030, 1, 3, 9, 0, 0).unwrap();
    let mut next = current.clone();
    next.scheduled_at = target;
    next.reschedule_count += 1;
    let record = RescheduleRecord {
        id: 0,
        appointment_id: current.id,
        previous_scheduled_at: current.scheduled_at,
        new_scheduled_at: target,
        actor_id: None,
        reason: None,
        created_at: current.created_at,
    };
    (next, record)
}

#[tokio::test]
async fn reschedule_goes_through_one_database_function() {
    let server = MockServer::start().await;
    let mut moved = appointment_json("scheduled");
    moved["scheduled_at"] = json!("2030-01-03T09:00:00Z");
    moved["reschedule_count"] = json!(1);
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/reschedule_appointment"))
        .and(body_partial_json(json!({
            "p_expected_status": "scheduled",
            "p_expected_reschedule_count": 0,
            "p_slot_capacity": 2,
            "p_record": { "appointment_id": 11 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(moved))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let current: Appointment = serde_json::from_value(appointment_json("scheduled")).unwrap();
    let (next, record) = reschedule_of(&current);
    let saved = store
        .reschedule_appointment(next, record, AppointmentGuard::of(&current), 2)
        .await
        .unwrap();
    assert_eq!(saved.reschedule_count, 1);
}

#[tokio::test]
async fn lost_reschedule_race_is_a_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/reschedule_appointment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;
    let mut winner = appointment_json("scheduled");
    winner["reschedule_count"] = json!(1);
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", "eq.11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([winner])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let current: Appointment = serde_json::from_value(appointment_json("scheduled")).unwrap();
    let (next, record) = reschedule_of(&current);
    let result = store
        .reschedule_appointment(next, record, AppointmentGuard::of(&current), 2)
        .await;
    assert_matches!(result, Err(StoreError::Conflict(msg)) if msg.contains("1 reschedule"));
}

#[tokio::test]
async fn full_target_slot_maps_to_slot_full() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/reschedule_appointment"))
        .respond_with(ResponseTemplate::new(409).set_body_string(
            r#"{"code":"P0001","message":"slot_full"}"#,
        ))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let current: Appointment = serde_json::from_value(appointment_json("scheduled")).unwrap();
    let (next, record) = reschedule_of(&current);
    let result = store
        .reschedule_appointment(next, record, AppointmentGuard::of(&current), 1)
        .await;
    assert_matches!(result, Err(StoreError::SlotFull(_)));
}

fn reminder_json(status: &str) -> serde_json::Value {
    json!({
        "id": 5,
        "appointment_id": 11,
        "offset_hours": 24,
        "status": status,
        "expected_send_at": "2030-01-01T09:00:00Z",
        "sent_at": null,
        "retry_count": 0,
        "error_message": null,
        "created_at": "2030-01-01T09:00:00Z",
        "updated_at": "2030-01-01T09:00:00Z"
    })
}

#[tokio::test]
async fn marking_a_withdrawn_reminder_sent_is_a_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointment_reminders"))
        .and(query_param("id", "eq.5"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_reminders"))
        .and(query_param("id", "eq.5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([reminder_json("cancelled")])),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    let now = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
    let result = store.mark_reminder_sent(5, now).await;
    assert_matches!(result, Err(StoreError::Conflict(msg)) if msg.contains("cancelled"));
    assert!(!store.release_reminder(5, now).await.unwrap());
}

#[tokio::test]
async fn ticket_issuance_goes_through_database_function() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/issue_queue_ticket"))
        .and(body_partial_json(json!({ "p_appointment_id": 11, "p_queue_date": "2030-01-02" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "appointment_id": 11,
            "branch_id": 1,
            "service_point_id": 4,
            "ticket_number": 7,
            "queue_date": "2030-01-02",
            "status": "waiting",
            "issued_at": "2030-01-02T09:05:00Z",
            "called_at": null,
            "completed_at": null
        })))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let issued_at = Utc.with_ymd_and_hms(2030, 1, 2, 9, 5, 0).unwrap();
    let ticket = store
        .issue_ticket(TicketDraft {
            appointment_id: 11,
            branch_id: 1,
            service_point_id: 4,
            queue_date: issued_at.date_naive(),
            issued_at,
        })
        .await
        .unwrap();
    assert_eq!(ticket.ticket_number, 7);
}

#[tokio::test]
async fn unique_violation_maps_to_duplicate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/issue_queue_ticket"))
        .respond_with(ResponseTemplate::new(409).set_body_string(
            r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#,
        ))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let issued_at = Utc.with_ymd_and_hms(2030, 1, 2, 9, 5, 0).unwrap();
    let result = store
        .issue_ticket(TicketDraft {
            appointment_id: 11,
            branch_id: 1,
            service_point_id: 4,
            queue_date: issued_at.date_naive(),
            issued_at,
        })
        .await;
    assert_matches!(result, Err(StoreError::Duplicate(_)));
}

#[tokio::test]
async fn already_claimed_reminder_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/claim_reminder"))
        .and(body_partial_json(json!({ "p_offset_hours": 24, "p_tolerance_minutes": 30 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let now = Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap();
    assert!(store.claim_reminder(11, 24, now, now).await.unwrap().is_none());
}

#[tokio::test]
async fn server_errors_surface_as_backend_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = store_for(&server);
    assert_matches!(store.find_appointment(11).await, Err(StoreError::Backend(_)));
}
