use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::Actor;
use shared_models::error::AppError;
use shared_models::{Appointment, AppointmentFilter, PolicyUpdate};

use crate::error::AppointmentError;
use crate::models::{
    AppointmentListQuery, BookAppointmentRequest, CancelAppointmentRequest, EmergencyModeRequest,
    NoShowSweepRequest, RescheduleAppointmentRequest,
};
use crate::services::booking::AppointmentService;
use crate::services::policy::PolicyService;

#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub appointments: Arc<AppointmentService>,
    pub policies: Arc<PolicyService>,
}

fn require_staff(actor: &Actor) -> Result<(), AppointmentError> {
    if actor.role.is_staff_or_admin() {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden("staff or admin role required".to_string()))
    }
}

fn require_admin(actor: &Actor) -> Result<(), AppointmentError> {
    if actor.role.is_admin() {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden("admin role required".to_string()))
    }
}

/// Customers only see and change their own bookings.
fn require_owner_or_staff(
    actor: &Actor,
    appointment: &Appointment,
) -> Result<(), AppointmentError> {
    let is_owner = actor.id.is_some() && appointment.customer_id == actor.id;
    if is_owner || actor.role.is_staff_or_admin() {
        Ok(())
    } else {
        Err(AppointmentError::Forbidden(
            "not allowed to access this appointment".to_string(),
        ))
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.book(request, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<i64>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.get(appointment_id).await?;
    require_owner_or_staff(&actor, &appointment)?;

    let history = state.appointments.reschedule_history(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "reschedules": history
    })))
}

/// Lookup by confirmation code; knowing the code is enough to read the booking.
#[axum::debug_handler]
pub async fn find_by_confirmation_code(
    State(state): State<AppointmentState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .appointments
        .find_by_confirmation_code(&code.trim().to_uppercase())
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No appointment with confirmation code {}", code))
        })?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;

    let appointments = state
        .appointments
        .list(AppointmentFilter {
            branch_id: query.branch_id,
            service_id: query.service_id,
            status: query.status,
            from: query.from,
            to: query.to,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "total": appointments.len(),
        "appointments": appointments
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<i64>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.get(appointment_id).await?;
    require_owner_or_staff(&actor, &appointment)?;

    let cancelled = state
        .appointments
        .cancel(appointment_id, &actor, request.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": cancelled,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<i64>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.appointments.get(appointment_id).await?;
    require_owner_or_staff(&actor, &appointment)?;

    let rescheduled = state
        .appointments
        .reschedule(appointment_id, request.new_scheduled_at, &actor, request.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": rescheduled,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn check_in_appointment(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<i64>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let appointment = state.appointments.check_in(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<i64>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let appointment = state.appointments.mark_no_show(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn sweep_no_shows(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<NoShowSweepRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let summary = state.appointments.mark_overdue_no_shows(request.branch_id).await?;

    Ok(Json(json!({
        "success": true,
        "summary": summary
    })))
}

// ==============================================================================
// POLICY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_policy(
    State(state): State<AppointmentState>,
    Path(branch_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let policy = state.policies.get(branch_id).await;

    Ok(Json(json!({
        "success": true,
        "policy": policy,
        "is_default": !policy.is_persisted()
    })))
}

#[axum::debug_handler]
pub async fn update_policy(
    State(state): State<AppointmentState>,
    Path(branch_id): Path<i64>,
    Extension(actor): Extension<Actor>,
    Json(update): Json<PolicyUpdate>,
) -> Result<Json<Value>, AppError> {
    require_admin(&actor)?;
    let policy = state
        .policies
        .upsert(branch_id, update, actor.id.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "policy": policy
    })))
}

#[axum::debug_handler]
pub async fn set_emergency_mode(
    State(state): State<AppointmentState>,
    Path(branch_id): Path<i64>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<EmergencyModeRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let policy = state
        .policies
        .toggle_emergency_mode(branch_id, request.enabled, actor.id.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "policy": policy
    })))
}

#[axum::debug_handler]
pub async fn reset_policy(
    State(state): State<AppointmentState>,
    Path(branch_id): Path<i64>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Value>, AppError> {
    require_admin(&actor)?;
    let removed = state.policies.reset(branch_id).await?;

    Ok(Json(json!({
        "success": true,
        "removed": removed,
        "policy": state.policies.get(branch_id).await
    })))
}
