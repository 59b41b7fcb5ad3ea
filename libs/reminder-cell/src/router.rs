use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, ReminderState};

pub fn create_reminder_router(state: ReminderState) -> Router {
    Router::new()
        .route("/scheduler", get(handlers::get_scheduler_status))
        .route("/scheduler/run", post(handlers::run_scheduler))
        .route("/scheduler/config", put(handlers::update_scheduler_config))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
