use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    advance_ticket, get_branch_queue, get_branch_stats, issue_ticket, transfer_ticket, QueueState,
};

pub fn create_queue_router(state: QueueState) -> Router {
    let public_routes = Router::new()
        .route("/branches/{branch_id}", get(get_branch_queue))
        .route("/branches/{branch_id}/stats", get(get_branch_stats));

    let protected_routes = Router::new()
        .route("/tickets", post(issue_ticket))
        .route("/tickets/{ticket_id}/status", post(advance_ticket))
        .route("/tickets/{ticket_id}/transfer", post(transfer_ticket))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
