use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use appointment_cell::PolicyService;
use reminder_cell::{NotificationSender, ReminderDispatcher, ReminderError};
use shared_database::{
    AppointmentGuard, AppointmentRepository, InMemoryStore, ReminderRepository, Repositories,
    StoreError,
};
use shared_models::{
    Appointment, AppointmentFilter, AppointmentStatus, NewAppointment, PolicyUpdate,
    ReminderStatus, RescheduleRecord,
};
use shared_utils::test_utils::TestFixtures;
use shared_utils::ManualClock;

const BRANCH: i64 = 1;

/// Records every send; addresses in `failing` get a transport error.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSender {
    fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, to: &str, _subject: &str, html_body: &str) -> Result<(), ReminderError> {
        if self.failing.lock().unwrap().contains(to) {
            return Err(ReminderError::Transport("mailbox unavailable".to_string()));
        }
        self.sent.lock().unwrap().push((to.to_string(), html_body.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    policies: Arc<PolicyService>,
    sender: Arc<RecordingSender>,
    dispatcher: Arc<ReminderDispatcher>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap()
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let repos = Repositories::from_store(store.clone());
    let clock = Arc::new(ManualClock::new(start()));
    let policies = Arc::new(PolicyService::new(repos.policies.clone(), clock.clone()));
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Arc::new(ReminderDispatcher::new(
        &repos,
        policies.clone(),
        sender.clone(),
        clock.clone(),
    ));

    Harness {
        store,
        clock,
        policies,
        sender,
        dispatcher,
    }
}

async fn book(h: &Harness, branch_id: i64, at: DateTime<Utc>, email: Option<&str>) -> Appointment {
    let mut new = TestFixtures::new_appointment(branch_id, 10, at, start());
    new.customer_email = email.map(str::to_string);
    h.store.create_appointment(new, usize::MAX).await.unwrap()
}

fn no_delay() -> StdDuration {
    StdDuration::ZERO
}

#[tokio::test]
async fn offset_windows_select_the_right_reminder() {
    let h = harness();
    let at = start() + Duration::hours(24) + Duration::minutes(10);
    let appointment = book(&h, BRANCH, at, Some("a@example.com")).await;

    let first = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(first.sent, 1);
    let records = h.store.list_reminders(appointment.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].offset_hours, 24);
    assert_eq!(records[0].status, ReminderStatus::Sent);

    // Half an hour later the appointment is still inside the 24h band.
    h.clock.advance(Duration::minutes(30));
    let again = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(again.sent, 0);
    assert_eq!(again.skipped, 1);

    h.clock.set(start() + Duration::hours(22));
    let later = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(later.sent, 1);

    let mut offsets: Vec<u32> = h
        .store
        .list_reminders(appointment.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ReminderStatus::Sent)
        .map(|r| r.offset_hours)
        .collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![2, 24]);
    assert_eq!(h.sender.recipients().len(), 2);
}

#[tokio::test]
async fn window_bounds_are_inclusive() {
    let h = harness();
    let day = start() + Duration::hours(24);
    book(&h, BRANCH, day + Duration::minutes(30), Some("edge@example.com")).await;
    book(&h, BRANCH, day + Duration::minutes(31), Some("out@example.com")).await;

    let summary = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(h.sender.recipients(), vec!["edge@example.com".to_string()]);
}

#[tokio::test]
async fn overlapping_passes_send_once() {
    let h = harness();
    book(&h, BRANCH, start() + Duration::hours(24), Some("once@example.com")).await;

    let (a, b) = tokio::join!(h.dispatcher.dispatch(no_delay()), h.dispatcher.dispatch(no_delay()));
    assert_eq!(a.unwrap().sent + b.unwrap().sent, 1);
    assert_eq!(h.sender.recipients().len(), 1);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_pass_and_is_retried() {
    let h = harness();
    let at = start() + Duration::hours(24);
    book(&h, BRANCH, at, Some("first@example.com")).await;
    let broken = book(&h, BRANCH, at, Some("broken@example.com")).await;
    book(&h, BRANCH, at, Some("third@example.com")).await;
    h.sender.fail_for("broken@example.com");

    let summary = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.errors, 1);

    let failed = h.store.list_reminders(broken.id).await.unwrap();
    assert_eq!(failed[0].status, ReminderStatus::Failed);
    assert!(failed[0].error_message.as_deref().unwrap_or_default().contains("mailbox unavailable"));

    h.sender.recover();
    h.clock.advance(Duration::minutes(10));
    let retry = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(retry.sent, 1);
    assert_eq!(retry.skipped, 2);

    let record = &h.store.list_reminders(broken.id).await.unwrap()[0];
    assert_eq!(record.status, ReminderStatus::Sent);
    assert_eq!(record.retry_count, 1);
}

#[tokio::test]
async fn branches_with_reminders_off_are_skipped() {
    let h = harness();
    book(&h, BRANCH, start() + Duration::hours(24), Some("quiet@example.com")).await;
    book(&h, 2, start() + Duration::hours(24), Some("closed@example.com")).await;
    book(&h, 3, start() + Duration::hours(24), Some("open@example.com")).await;

    h.policies
        .upsert(BRANCH, PolicyUpdate { reminders_enabled: Some(false), ..Default::default() }, None)
        .await
        .unwrap();
    h.policies
        .upsert(2, PolicyUpdate { is_active: Some(false), ..Default::default() }, None)
        .await
        .unwrap();

    let summary = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.branches_checked, 1);
    assert_eq!(h.sender.recipients(), vec!["open@example.com".to_string()]);
}

#[tokio::test]
async fn branch_offsets_and_template_are_used() {
    let h = harness();
    book(&h, BRANCH, start() + Duration::hours(6), Some("six@example.com")).await;
    h.policies
        .upsert(
            BRANCH,
            PolicyUpdate {
                reminder_offsets_hours: Some(vec![6]),
                reminder_message_template: Some("See you in {hours} hours".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let summary = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.sent, 1);
    let sent = h.sender.sent.lock().unwrap().clone();
    assert_eq!(sent[0].1, "See you in 6 hours");
}

#[tokio::test]
async fn appointments_without_email_are_skipped_without_a_record() {
    let h = harness();
    let silent = book(&h, BRANCH, start() + Duration::hours(24), None).await;

    let summary = h.dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 0);
    assert!(h.store.list_reminders(silent.id).await.unwrap().is_empty());
}

/// Applies `change` to every appointment right after handing it out as a
/// reminder candidate, as a cancel or reschedule landing mid-pass would.
struct ChangedAfterListing {
    inner: Arc<InMemoryStore>,
    change: fn(&mut Appointment),
}

#[async_trait]
impl AppointmentRepository for ChangedAfterListing {
    async fn create_appointment(
        &self,
        appointment: NewAppointment,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        self.inner.create_appointment(appointment, slot_capacity).await
    }

    async fn find_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        self.inner.find_appointment(id).await
    }

    async fn find_by_confirmation_code(
        &self,
        code: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        self.inner.find_by_confirmation_code(code).await
    }

    async fn update_appointment_guarded(
        &self,
        appointment: Appointment,
        guard: AppointmentGuard,
    ) -> Result<Appointment, StoreError> {
        self.inner.update_appointment_guarded(appointment, guard).await
    }

    async fn reschedule_appointment(
        &self,
        appointment: Appointment,
        record: RescheduleRecord,
        guard: AppointmentGuard,
        slot_capacity: usize,
    ) -> Result<Appointment, StoreError> {
        self.inner
            .reschedule_appointment(appointment, record, guard, slot_capacity)
            .await
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let listed = self.inner.list_appointments(filter).await?;
        for appointment in &listed {
            let mut changed = appointment.clone();
            (self.change)(&mut changed);
            self.inner
                .update_appointment_guarded(changed, AppointmentGuard::of(appointment))
                .await?;
        }
        Ok(listed)
    }

    async fn list_scheduled_branch_ids(
        &self,
        from: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        self.inner.list_scheduled_branch_ids(from).await
    }
}

fn dispatcher_with_change(h: &Harness, change: fn(&mut Appointment)) -> ReminderDispatcher {
    let repos = Repositories {
        appointments: Arc::new(ChangedAfterListing {
            inner: h.store.clone(),
            change,
        }),
        ..Repositories::from_store(h.store.clone())
    };
    ReminderDispatcher::new(&repos, h.policies.clone(), h.sender.clone(), h.clock.clone())
}

#[tokio::test]
async fn appointment_cancelled_mid_pass_gets_no_reminder() {
    let h = harness();
    let appointment =
        book(&h, BRANCH, start() + Duration::hours(24), Some("gone@example.com")).await;
    let dispatcher = dispatcher_with_change(&h, |a| a.status = AppointmentStatus::Cancelled);

    let summary = dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.skipped, 1);
    assert!(h.sender.recipients().is_empty());

    let records = h.store.list_reminders(appointment.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ReminderStatus::Cancelled);
}

#[tokio::test]
async fn appointment_moved_mid_pass_gets_no_stale_reminder() {
    let h = harness();
    let appointment =
        book(&h, BRANCH, start() + Duration::hours(24), Some("moved@example.com")).await;
    let dispatcher = dispatcher_with_change(&h, |a| a.scheduled_at += Duration::days(2));

    let summary = dispatcher.dispatch(no_delay()).await.unwrap();
    assert_eq!(summary.sent, 0);
    assert!(h.sender.recipients().is_empty());
    let records = h.store.list_reminders(appointment.id).await.unwrap();
    assert_eq!(records[0].status, ReminderStatus::Cancelled);
}
