use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{info, warn};

use appointment_cell::router::{appointment_routes, policy_routes};
use appointment_cell::{AppointmentService, AppointmentState, PolicyService};
use booking_queue_cell::{create_queue_router, QueueState, QueueTicketingService};
use reminder_cell::{
    create_reminder_router, sender_from_config, ReminderDispatcher, ReminderScheduler,
    ReminderState,
    SchedulerConfig,
};
use shared_config::AppConfig;
use shared_database::{InMemoryStore, Repositories, SupabaseClient, SupabaseStore};
use shared_utils::{Clock, SystemClock};

/// Long-lived services shared by every request.
pub struct AppServices {
    pub config: Arc<AppConfig>,
    pub policies: Arc<PolicyService>,
    pub appointments: Arc<AppointmentService>,
    pub ticketing: Arc<QueueTicketingService>,
    pub scheduler: Arc<ReminderScheduler>,
}

fn repositories(config: &AppConfig) -> Repositories {
    if config.is_configured() {
        info!("Using Supabase store at {}", config.supabase_url);
        let client = Arc::new(SupabaseClient::new(config));
        Repositories::from_store(Arc::new(SupabaseStore::new(
            client,
            config.supabase_anon_key.clone(),
        )))
    } else {
        warn!("Supabase not configured, data lives in memory and is lost on restart");
        Repositories::from_store(Arc::new(InMemoryStore::new()))
    }
}

impl AppServices {
    pub fn build(config: Arc<AppConfig>) -> Self {
        let repos = repositories(&config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let policies = Arc::new(PolicyService::new(repos.policies.clone(), clock.clone()));
        let appointments = Arc::new(AppointmentService::new(
            &repos,
            policies.clone(),
            clock.clone(),
            config.no_show_grace_minutes,
        ));
        let ticketing = Arc::new(QueueTicketingService::new(
            &repos,
            appointments.clone(),
            clock.clone(),
        ));

        let dispatcher = Arc::new(ReminderDispatcher::new(
            &repos,
            policies.clone(),
            sender_from_config(&config),
            clock.clone(),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            dispatcher,
            clock,
            SchedulerConfig::from_app_config(&config),
        ));

        Self {
            config,
            policies,
            appointments,
            ticketing,
            scheduler,
        }
    }
}

pub fn create_router(services: &AppServices) -> Router {
    let appointment_state = AppointmentState {
        config: services.config.clone(),
        appointments: services.appointments.clone(),
        policies: services.policies.clone(),
    };
    let queue_state = QueueState {
        config: services.config.clone(),
        ticketing: services.ticketing.clone(),
    };
    let reminder_state = ReminderState {
        config: services.config.clone(),
        scheduler: services.scheduler.clone(),
    };

    Router::new()
        .route("/", get(|| async { "Branch queue API is running!" }))
        .nest("/appointments", appointment_routes(appointment_state.clone()))
        .nest("/policies", policy_routes(appointment_state))
        .nest("/queue", create_queue_router(queue_state))
        .nest("/reminders", create_reminder_router(reminder_state))
}
