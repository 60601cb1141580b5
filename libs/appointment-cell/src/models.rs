// libs/appointment-cell/src/models.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use patient_cell::models::{PatientError, PatientSelection};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// Appointment row. Column names follow the production schema, which is
/// Spanish throughout (`medico_id`, `fecha_hora`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    #[serde(rename = "medico_id")]
    pub doctor_id: Uuid,
    #[serde(rename = "paciente_id")]
    pub patient_id: Option<Uuid>,
    pub offline_patient_id: Option<Uuid>,
    #[serde(rename = "fecha_hora")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "duracion_minutos")]
    pub duration_minutes: i32,
    #[serde(rename = "tipo_cita")]
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    #[serde(rename = "motivo")]
    pub reason: Option<String>,
    #[serde(rename = "notas_internas")]
    pub internal_notes: Option<String>,
    pub color: Option<String>,
    #[serde(rename = "precio")]
    pub price: Option<f64>,
    pub meeting_url: Option<String>,
    #[serde(rename = "metodo_pago")]
    pub payment_method: Option<String>,
    #[serde(rename = "enviar_recordatorio", default)]
    pub send_reminder: bool,
    pub location_id: Option<Uuid>,
    pub series_id: Option<Uuid>,
    pub recurrence_index: Option<i32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppointmentStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "confirmada")]
    Confirmed,
    #[serde(rename = "en_curso")]
    InProgress,
    #[serde(rename = "completada")]
    Completed,
    #[serde(rename = "cancelada")]
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pendiente"),
            AppointmentStatus::Confirmed => write!(f, "confirmada"),
            AppointmentStatus::InProgress => write!(f, "en_curso"),
            AppointmentStatus::Completed => write!(f, "completada"),
            AppointmentStatus::Cancelled => write!(f, "cancelada"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentType {
    #[serde(rename = "presencial")]
    InPerson,
    #[serde(rename = "telemedicina")]
    Telemedicine,
    #[serde(rename = "urgencia")]
    Urgent,
    #[serde(rename = "seguimiento")]
    FollowUp,
    #[serde(rename = "primera_vez")]
    FirstVisit,
}

impl AppointmentType {
    /// Calendar color, fixed per type.
    pub fn color(&self) -> &'static str {
        match self {
            AppointmentType::InPerson => "#3B82F6",
            AppointmentType::Telemedicine => "#10B981",
            AppointmentType::Urgent => "#EF4444",
            AppointmentType::FollowUp => "#8B5CF6",
            AppointmentType::FirstVisit => "#F59E0B",
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InPerson => write!(f, "presencial"),
            AppointmentType::Telemedicine => write!(f, "telemedicina"),
            AppointmentType::Urgent => write!(f, "urgencia"),
            AppointmentType::FollowUp => write!(f, "seguimiento"),
            AppointmentType::FirstVisit => write!(f, "primera_vez"),
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient: PatientSelection,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub reason: String,
    pub internal_notes: Option<String>,
    pub price: Option<f64>,
    pub payment_method: Option<String>,
    #[serde(default = "default_send_reminder")]
    pub send_reminder: bool,
    pub office_id: Option<Uuid>,
    pub dental_details: Option<DentalDetails>,
}

fn default_send_reminder() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSeriesRequest {
    pub patient: PatientSelection,
    pub starts_on: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
    pub internal_notes: Option<String>,
    pub price: Option<f64>,
    pub payment_method: Option<String>,
    pub office_id: Option<Uuid>,
    pub rule: RecurrenceRule,
}

/// Dental procedure annex attached to an appointment in a best-effort
/// secondary write.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DentalDetails {
    pub procedure_code: Option<String>,
    pub procedure_name: Option<String>,
    #[serde(default)]
    pub tooth_numbers: Vec<i32>,
    #[serde(default)]
    pub surfaces: Vec<String>,
    pub quadrant: Option<i32>,
    #[serde(default)]
    pub requires_anesthesia: bool,
    pub anesthesia_type: Option<String>,
    #[serde(default)]
    pub requires_sedation: bool,
    pub sedation_type: Option<String>,
    pub notes: Option<String>,
}

impl DentalDetails {
    /// An annex row is only written when the form actually captured something.
    pub fn is_empty(&self) -> bool {
        self.procedure_code.is_none()
            && self.procedure_name.is_none()
            && self.tooth_numbers.is_empty()
            && self.surfaces.is_empty()
            && self.quadrant.is_none()
            && !self.requires_anesthesia
            && !self.requires_sedation
            && self.notes.is_none()
    }
}

// ==============================================================================
// RECURRENCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceCadence {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Custom,
}

/// Termination condition for a series. The variants are mutually exclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceEnd {
    Never,
    OnDate { date: NaiveDate },
    AfterCount { count: u32 },
}

/// Ephemeral recurrence rule. Weekdays use 0=Sunday..6=Saturday, matching
/// the `recurrence_days` column written by the series table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub cadence: RecurrenceCadence,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub weekdays: Vec<u8>,
    pub end: RecurrenceEnd,
}

fn default_interval() -> u32 {
    1
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictingAppointment {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub reason: Option<String>,
    pub patient_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictingAppointment>,
    pub message: Option<String>,
}

impl ConflictCheckResponse {
    pub fn clear() -> Self {
        Self {
            has_conflict: false,
            conflicts: vec![],
            message: None,
        }
    }
}

// ==============================================================================
// OUTCOME MODELS
// ==============================================================================

/// Result of a single-appointment booking. The annex write is best-effort:
/// `annex_saved == false` means the appointment exists but its dental annex
/// does not, and `warning` carries the user-facing explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub appointment_id: Uuid,
    pub meeting_url: Option<String>,
    pub annex_saved: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesOutcome {
    pub series_id: Uuid,
    pub created: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSeriesRequest {
    pub scope: SeriesCancelScope,
    pub from_appointment_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeriesCancelScope {
    ThisOnly,
    ThisAndFuture,
    All,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Appointment conflicts with existing bookings")]
    ConflictDetected(Vec<ConflictingAppointment>),

    #[error("Appointment not found")]
    NotFound,

    #[error(transparent)]
    Patient(#[from] PatientError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl IntoResponse for SchedulingError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            SchedulingError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": msg }),
            ),
            SchedulingError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg }),
            ),
            SchedulingError::ConflictDetected(conflicts) => (
                StatusCode::CONFLICT,
                json!({
                    "error": "Appointment conflicts with existing bookings",
                    "conflicts": conflicts,
                }),
            ),
            SchedulingError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "error": "Appointment not found" }),
            ),
            SchedulingError::Patient(PatientError::ValidationError(msg)) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg }),
            ),
            SchedulingError::Patient(PatientError::DuplicateNotRecovered) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Patient already exists but could not be recovered" }),
            ),
            // Infrastructure detail stays in the logs, the caller gets a
            // generic message.
            SchedulingError::Patient(PatientError::DatabaseError(_))
            | SchedulingError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "The appointment could not be saved, please try again" }),
            ),
        };

        tracing::error!("Scheduling error ({}): {}", status, self);

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_color_mapping_is_fixed() {
        assert_eq!(AppointmentType::InPerson.color(), "#3B82F6");
        assert_eq!(AppointmentType::Telemedicine.color(), "#10B981");
        assert_eq!(AppointmentType::Urgent.color(), "#EF4444");
        assert_eq!(AppointmentType::FollowUp.color(), "#8B5CF6");
        assert_eq!(AppointmentType::FirstVisit.color(), "#F59E0B");
    }

    #[test]
    fn status_serializes_to_schema_values() {
        assert_eq!(
            serde_json::to_value(AppointmentStatus::Pending).unwrap(),
            "pendiente"
        );
        assert_eq!(
            serde_json::to_value(AppointmentStatus::Cancelled).unwrap(),
            "cancelada"
        );
        assert_eq!(AppointmentStatus::InProgress.to_string(), "en_curso");
    }

    #[test]
    fn appointment_row_roundtrip() {
        let row = serde_json::json!({
            "id": "1f4a2c4e-0000-4000-8000-000000000001",
            "medico_id": "1f4a2c4e-0000-4000-8000-000000000002",
            "paciente_id": "1f4a2c4e-0000-4000-8000-000000000003",
            "offline_patient_id": null,
            "fecha_hora": "2026-09-01T09:00:00+00:00",
            "duracion_minutos": 30,
            "tipo_cita": "telemedicina",
            "status": "pendiente",
            "motivo": "Control",
            "notas_internas": null,
            "color": "#10B981",
            "precio": 25.0,
            "meeting_url": "https://meet.jit.si/cita-1f4a2c4e",
            "metodo_pago": "efectivo",
            "enviar_recordatorio": true,
            "location_id": null,
            "series_id": null,
            "recurrence_index": null
        });

        let apt: Appointment = serde_json::from_value(row).unwrap();
        assert_eq!(apt.appointment_type, AppointmentType::Telemedicine);
        assert_eq!(apt.duration_minutes, 30);
        assert_eq!(
            apt.end_time(),
            apt.start_time + chrono::Duration::minutes(30)
        );
    }

    #[test]
    fn empty_dental_details_detected() {
        let empty = DentalDetails::default();
        assert!(empty.is_empty());

        let with_procedure = DentalDetails {
            procedure_code: Some("D2140".to_string()),
            ..Default::default()
        };
        assert!(!with_procedure.is_empty());
    }
}
