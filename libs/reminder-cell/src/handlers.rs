use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::error::ReminderError;
use crate::models::SchedulerConfigUpdate;
use crate::services::scheduler::ReminderScheduler;

#[derive(Clone)]
pub struct ReminderState {
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<ReminderScheduler>,
}

fn require_staff(actor: &Actor) -> Result<(), ReminderError> {
    if actor.role.is_staff_or_admin() {
        Ok(())
    } else {
        Err(ReminderError::Forbidden("staff or admin role required".to_string()))
    }
}

fn require_admin(actor: &Actor) -> Result<(), ReminderError> {
    if actor.role.is_admin() {
        Ok(())
    } else {
        Err(ReminderError::Forbidden("admin role required".to_string()))
    }
}

pub async fn get_scheduler_status(
    State(state): State<ReminderState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let status = state.scheduler.status().await;

    Ok(Json(json!({
        "success": true,
        "scheduler": status
    })))
}

pub async fn run_scheduler(
    State(state): State<ReminderState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    require_admin(&actor)?;

    let response = match state.scheduler.run_now().await {
        Some(summary) => json!({
            "success": true,
            "skipped": false,
            "summary": summary,
            "message": "Reminder pass completed"
        }),
        None => json!({
            "success": true,
            "skipped": true,
            "message": "A reminder pass is already running"
        }),
    };

    Ok(Json(response))
}

pub async fn update_scheduler_config(
    State(state): State<ReminderState>,
    Extension(actor): Extension<Actor>,
    Json(update): Json<SchedulerConfigUpdate>,
) -> Result<Json<Value>, AppError> {
    require_admin(&actor)?;

    let next = state.scheduler.config().await.apply(&update);
    let status = state.scheduler.update_config(next).await?;

    Ok(Json(json!({
        "success": true,
        "scheduler": status,
        "message": "Scheduler configuration updated"
    })))
}
