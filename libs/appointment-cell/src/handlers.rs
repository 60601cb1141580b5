// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    CancelAppointmentRequest, CancelSeriesRequest, CreateAppointmentRequest, CreateSeriesRequest,
    SchedulingError,
};
use crate::services::booking::AppointmentWriterService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub exclude_appointment_id: Option<Uuid>,
}

fn writer_service(state: &AppConfig) -> AppointmentWriterService {
    AppointmentWriterService::new(Arc::new(SupabaseClient::new(state)))
}

/// The authenticated user is the doctor all routes operate as.
fn doctor_id(user: &User) -> Result<Uuid, SchedulingError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| SchedulingError::Unauthorized("Token subject is not a valid user id".to_string()))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let outcome = service
        .create_appointment(doctor_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": outcome.appointment_id,
        "meeting_url": outcome.meeting_url,
        "annex_saved": outcome.annex_saved,
        "warning": outcome.warning,
    })))
}

#[axum::debug_handler]
pub async fn create_series(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSeriesRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let outcome = service
        .create_series(doctor_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "series_id": outcome.series_id,
        "created": outcome.created,
    })))
}

// ==============================================================================
// CONFLICT CHECK HANDLER
// ==============================================================================

/// Advisory pre-check for the booking form. A backend failure reports the
/// slot as clear; the save path re-checks authoritatively.
#[axum::debug_handler]
pub async fn check_conflicts(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let response = service
        .conflict_service()
        .advisory_check(
            doctor_id,
            params.start_time,
            params.duration_minutes,
            params.exclude_appointment_id,
            auth.token(),
        )
        .await;

    Ok(Json(serde_json::to_value(response).unwrap_or_default()))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentListQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let appointments = service
        .list_appointments(doctor_id, params.from, params.to, auth.token())
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "count": appointments.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let appointment = service
        .get_appointment(doctor_id, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({ "appointment": appointment })))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let reason = request.and_then(|Json(r)| r.reason);
    service
        .cancel_appointment(doctor_id, appointment_id, reason, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment cancelled successfully",
    })))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    service
        .confirm_appointment(doctor_id, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment confirmed successfully",
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    service
        .complete_appointment(doctor_id, appointment_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment completed successfully",
    })))
}

#[axum::debug_handler]
pub async fn cancel_series(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(series_id): Path<Uuid>,
    Json(request): Json<CancelSeriesRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let doctor_id = doctor_id(&user)?;
    let service = writer_service(&state);

    let cancelled = service
        .cancel_series(doctor_id, series_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "cancelled": cancelled,
    })))
}
