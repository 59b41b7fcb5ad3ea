use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::info;

use shared_config::AppConfig;
use shared_models::{auth::Actor, error::AppError};

use crate::error::QueueError;
use crate::models::{AdvanceTicketRequest, IssueTicketRequest, QueueQuery, TransferTicketRequest};
use crate::services::ticketing::QueueTicketingService;

#[derive(Clone)]
pub struct QueueState {
    pub config: Arc<AppConfig>,
    pub ticketing: Arc<QueueTicketingService>,
}

fn require_staff(actor: &Actor) -> Result<(), QueueError> {
    if actor.role.is_staff_or_admin() {
        Ok(())
    } else {
        Err(QueueError::Forbidden("staff or admin role required".to_string()))
    }
}

/// Enqueue a checked-in appointment at a service point
pub async fn issue_ticket(
    State(state): State<QueueState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<IssueTicketRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    info!("Ticket request for appointment {} by {}", request.appointment_id, actor.role);

    let ticket = state
        .ticketing
        .issue_ticket(request.appointment_id, request.service_point_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "ticket": ticket
    })))
}

pub async fn advance_ticket(
    State(state): State<QueueState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<i64>,
    Json(request): Json<AdvanceTicketRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let ticket = state.ticketing.advance_status(ticket_id, request.status).await?;

    Ok(Json(json!({
        "success": true,
        "ticket": ticket
    })))
}

pub async fn transfer_ticket(
    State(state): State<QueueState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<i64>,
    Json(request): Json<TransferTicketRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let ticket = state
        .ticketing
        .transfer(ticket_id, request.service_point_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "ticket": ticket
    })))
}

/// Queue board for a branch
pub async fn get_branch_queue(
    State(state): State<QueueState>,
    Path(branch_id): Path<i64>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let day = query.date.unwrap_or_else(|| state.ticketing.today());
    let tickets = state.ticketing.list_queue(branch_id, day).await?;

    Ok(Json(json!({
        "success": true,
        "branch_id": branch_id,
        "queue_date": day,
        "tickets": tickets
    })))
}

pub async fn get_branch_stats(
    State(state): State<QueueState>,
    Path(branch_id): Path<i64>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let day = query.date.unwrap_or_else(|| state.ticketing.today());
    let stats = state.ticketing.queue_stats(branch_id, day).await?;

    Ok(Json(json!({
        "success": true,
        "stats": stats
    })))
}
