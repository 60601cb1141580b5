use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{NewOfflinePatient, PatientError, PatientSelection, ResolvedPatient};

pub struct OfflinePatientService {
    supabase: Arc<SupabaseClient>,
}

impl OfflinePatientService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Resolve the patient reference for an appointment.
    ///
    /// A `New` selection inserts an offline-patient row; if the same cedula
    /// already exists for this doctor, the existing row is looked up and
    /// reused instead of failing the booking. An `Existing` selection is
    /// classified as offline or registered by a doctor-scoped lookup.
    pub async fn resolve_for_appointment(
        &self,
        doctor_id: &str,
        selection: &PatientSelection,
        auth_token: &str,
    ) -> Result<ResolvedPatient, PatientError> {
        match selection {
            PatientSelection::New(data) => {
                self.create_or_recover(doctor_id, data, auth_token).await
            }
            PatientSelection::Existing { patient_id } => {
                let is_offline = self
                    .is_offline_patient(doctor_id, *patient_id, auth_token)
                    .await?;
                Ok(ResolvedPatient {
                    patient_id: *patient_id,
                    is_offline,
                })
            }
        }
    }

    async fn create_or_recover(
        &self,
        doctor_id: &str,
        data: &NewOfflinePatient,
        auth_token: &str,
    ) -> Result<ResolvedPatient, PatientError> {
        if data.cedula.trim().is_empty() {
            return Err(PatientError::ValidationError(
                "Offline patient requires a cedula".to_string(),
            ));
        }
        if data.nombre_completo.trim().is_empty() {
            return Err(PatientError::ValidationError(
                "Offline patient requires a full name".to_string(),
            ));
        }

        let body = json!({
            "doctor_id": doctor_id,
            "nombre_completo": data.nombre_completo,
            "cedula": data.cedula,
            "email": data.email,
            "status": "offline",
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let created: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/offline_patients?select=id",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await;

        match created {
            Ok(rows) => {
                let id = Self::parse_id(rows.first())?;
                info!("Created offline patient {} for doctor {}", id, doctor_id);
                Ok(ResolvedPatient {
                    patient_id: id,
                    is_offline: true,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    "Offline patient with cedula already exists for doctor {}, recovering",
                    doctor_id
                );
                self.recover_by_cedula(doctor_id, &data.cedula, auth_token)
                    .await
            }
            Err(e) => Err(PatientError::DatabaseError(e.to_string())),
        }
    }

    async fn recover_by_cedula(
        &self,
        doctor_id: &str,
        cedula: &str,
        auth_token: &str,
    ) -> Result<ResolvedPatient, PatientError> {
        let path = format!(
            "/rest/v1/offline_patients?doctor_id=eq.{}&cedula=eq.{}&select=id",
            doctor_id,
            urlencoding::encode(cedula)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|_| PatientError::DuplicateNotRecovered)?;

        if rows.is_empty() {
            return Err(PatientError::DuplicateNotRecovered);
        }

        let id = Self::parse_id(rows.first())?;
        info!(
            "Reusing existing offline patient {} for doctor {}",
            id, doctor_id
        );
        Ok(ResolvedPatient {
            patient_id: id,
            is_offline: true,
        })
    }

    async fn is_offline_patient(
        &self,
        doctor_id: &str,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, PatientError> {
        let path = format!(
            "/rest/v1/offline_patients?doctor_id=eq.{}&id=eq.{}&select=id",
            doctor_id, patient_id
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        Ok(!rows.is_empty())
    }

    fn parse_id(row: Option<&Value>) -> Result<Uuid, PatientError> {
        row.and_then(|r| r["id"].as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                PatientError::DatabaseError("Offline patient row missing id".to_string())
            })
    }
}

/// Postgres signals a duplicate (doctor_id, cedula) pair with SQLSTATE 23505;
/// PostgREST forwards it in the error body.
fn is_unique_violation(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    msg.contains("23505") || msg.contains("duplicate key")
}
