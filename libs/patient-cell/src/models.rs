use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the scheduling form refers to the patient being booked.
///
/// `Existing` may point at either a registered platform account or an
/// offline-patient row; which one it is gets resolved against the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatientSelection {
    Existing { patient_id: Uuid },
    New(NewOfflinePatient),
}

/// Data captured for a patient without a platform account. The cedula
/// (national id document) is unique per doctor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOfflinePatient {
    pub nombre_completo: String,
    pub cedula: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPatient {
    pub patient_id: Uuid,
    pub is_offline: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PatientError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Patient already exists but could not be recovered")]
    DuplicateNotRecovered,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
