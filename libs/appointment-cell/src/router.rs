use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};

use shared_utils::extractor::{auth_middleware, optional_auth_middleware};

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: AppointmentState) -> Router {
    let public_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/code/{confirmation_code}", get(handlers::find_by_confirmation_code))
        .layer(middleware::from_fn_with_state(state.config.clone(), optional_auth_middleware));

    let protected_routes = Router::new()
        .route("/", get(handlers::list_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/check-in", post(handlers::check_in_appointment))
        .route("/{appointment_id}/no-show", post(handlers::mark_no_show))
        .route("/no-show/sweep", post(handlers::sweep_no_shows))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

pub fn policy_routes(state: AppointmentState) -> Router {
    let public_routes = Router::new().route("/{branch_id}", get(handlers::get_policy));

    let protected_routes = Router::new()
        .route("/{branch_id}", put(handlers::update_policy))
        .route("/{branch_id}", delete(handlers::reset_policy))
        .route("/{branch_id}/emergency", post(handlers::set_emergency_mode))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
