use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{ConflictCheckResponse, ConflictingAppointment, SchedulingError};

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Advisory pre-check, used while the doctor is still filling the form.
    /// If the database is unreachable the check reports no conflict so the
    /// form stays usable; the authoritative check at save time catches the
    /// real overlap.
    pub async fn advisory_check(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> ConflictCheckResponse {
        match self
            .find_conflicts(
                doctor_id,
                start_time,
                duration_minutes,
                exclude_appointment_id,
                auth_token,
            )
            .await
        {
            Ok(conflicts) => Self::build_response(conflicts),
            Err(e) => {
                warn!("Advisory conflict check failed, reporting clear: {}", e);
                ConflictCheckResponse::clear()
            }
        }
    }

    /// Authoritative check at save time. A database failure here aborts the
    /// booking instead of letting a possibly-overlapping appointment through.
    pub async fn authoritative_check(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let conflicts = self
            .find_conflicts(
                doctor_id,
                start_time,
                duration_minutes,
                exclude_appointment_id,
                auth_token,
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if conflicts.is_empty() {
            Ok(())
        } else {
            warn!(
                "Conflict detected for doctor {}: {} overlapping appointments",
                doctor_id,
                conflicts.len()
            );
            Err(SchedulingError::ConflictDetected(conflicts))
        }
    }

    async fn find_conflicts(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> anyhow::Result<Vec<ConflictingAppointment>> {
        let end_time = start_time + Duration::minutes(duration_minutes as i64);
        debug!(
            "Checking conflicts for doctor {} from {} to {}",
            doctor_id, start_time, end_time
        );

        // Appointments starting inside the requested window.
        let starting_within = self
            .fetch_window(
                doctor_id,
                Some(start_time),
                end_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        // Appointments that started earlier and may still be running when the
        // requested slot begins. The server can't compare fecha_hora plus
        // duration, so this query has no lower bound and is filtered
        // client-side on computed end.
        let started_earlier = self
            .fetch_window(
                doctor_id,
                None,
                start_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        let mut conflicts: Vec<ConflictingAppointment> = Vec::new();

        for row in starting_within.iter().chain(started_earlier.iter()) {
            if let Some(candidate) = Self::parse_row(row) {
                let candidate_end = candidate.start_time
                    + Duration::minutes(candidate.duration_minutes as i64);
                if overlaps(start_time, end_time, candidate.start_time, candidate_end)
                    && !conflicts.iter().any(|c| c.id == candidate.id)
                {
                    conflicts.push(candidate);
                }
            }
        }

        conflicts.sort_by_key(|c| c.start_time);
        Ok(conflicts)
    }

    async fn fetch_window(
        &self,
        doctor_id: Uuid,
        starts_from: Option<DateTime<Utc>>,
        starts_before: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> anyhow::Result<Vec<Value>> {
        let path = Self::window_query(doctor_id, starts_from, starts_before, exclude_appointment_id);

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
    }

    /// Query for non-cancelled appointments whose start falls in
    /// `[starts_from, starts_before)`. `starts_from = None` leaves the query
    /// unbounded below: a long consultation that began hours before the
    /// proposed slot can still be running when it starts, and bounding the
    /// lookback would hide it.
    fn window_query(
        doctor_id: Uuid,
        starts_from: Option<DateTime<Utc>>,
        starts_before: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> String {
        let mut query_parts = vec![format!("medico_id=eq.{}", doctor_id)];

        // RFC 3339 timestamps carry '+' in the offset, which PostgREST
        // would read as a space unless encoded.
        if let Some(from) = starts_from {
            query_parts.push(format!(
                "fecha_hora=gte.{}",
                urlencoding::encode(&from.to_rfc3339())
            ));
        }
        query_parts.push(format!(
            "fecha_hora=lt.{}",
            urlencoding::encode(&starts_before.to_rfc3339())
        ));
        query_parts.push("status=neq.cancelada".to_string());

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        format!(
            "/rest/v1/appointments?{}&select=id,fecha_hora,duracion_minutos,motivo,paciente:patients(nombre_completo),offline_patient:offline_patients(nombre_completo)&order=fecha_hora.asc",
            query_parts.join("&")
        )
    }

    fn parse_row(row: &Value) -> Option<ConflictingAppointment> {
        let id = row["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
        let start_time = row["fecha_hora"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))?;
        let duration_minutes = row["duracion_minutos"].as_i64()? as i32;

        Some(ConflictingAppointment {
            id,
            start_time,
            duration_minutes,
            reason: row["motivo"].as_str().map(String::from),
            patient_name: Self::extract_patient_name(row),
        })
    }

    /// PostgREST returns embedded resources as an object for to-one
    /// relationships but as an array when the FK is not recognized as such,
    /// so both shapes are accepted.
    fn extract_patient_name(row: &Value) -> String {
        for key in ["paciente", "offline_patient"] {
            let embedded = &row[key];
            let name = match embedded {
                Value::Object(_) => embedded["nombre_completo"].as_str(),
                Value::Array(items) => items.first().and_then(|v| v["nombre_completo"].as_str()),
                _ => None,
            };
            if let Some(name) = name {
                return name.to_string();
            }
        }
        "Paciente".to_string()
    }

    fn build_response(conflicts: Vec<ConflictingAppointment>) -> ConflictCheckResponse {
        let has_conflict = !conflicts.is_empty();
        let message = conflicts.first().map(|c| {
            format!(
                "Ya existe una cita con {} a las {}",
                c.patient_name,
                c.start_time.format("%H:%M")
            )
        });

        ConflictCheckResponse {
            has_conflict,
            conflicts,
            message,
        }
    }
}

/// Two half-open intervals overlap when each starts before the other ends.
/// Back-to-back appointments (one ending exactly when the next starts) do
/// not overlap.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, hour, min, 0).unwrap()
    }

    #[test]
    fn partial_overlap_conflicts() {
        assert!(overlaps(at(9, 0), at(10, 0), at(9, 30), at(10, 30)));
        assert!(overlaps(at(9, 30), at(10, 30), at(9, 0), at(10, 0)));
    }

    #[test]
    fn containment_conflicts() {
        assert!(overlaps(at(9, 0), at(11, 0), at(9, 30), at(10, 0)));
        assert!(overlaps(at(9, 30), at(10, 0), at(9, 0), at(11, 0)));
    }

    #[test]
    fn back_to_back_does_not_conflict() {
        assert!(!overlaps(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(!overlaps(at(10, 0), at(11, 0), at(9, 0), at(10, 0)));
    }

    #[test]
    fn disjoint_slots_do_not_conflict() {
        assert!(!overlaps(at(9, 0), at(9, 30), at(14, 0), at(14, 30)));
    }

    #[test]
    fn earlier_start_query_is_unbounded_below() {
        let q = ConflictDetectionService::window_query(Uuid::new_v4(), None, at(9, 0), None);
        assert!(!q.contains("gte."));
        assert!(q.contains("fecha_hora=lt."));
        assert!(q.contains("status=neq.cancelada"));
    }

    #[test]
    fn window_query_bounds_both_ends_when_given() {
        let q = ConflictDetectionService::window_query(
            Uuid::new_v4(),
            Some(at(9, 0)),
            at(10, 0),
            None,
        );
        assert!(q.contains("fecha_hora=gte."));
        assert!(q.contains("fecha_hora=lt."));
    }

    #[test]
    fn excluded_appointment_appears_in_query() {
        let exclude = Uuid::new_v4();
        let q = ConflictDetectionService::window_query(
            Uuid::new_v4(),
            Some(at(9, 0)),
            at(10, 0),
            Some(exclude),
        );
        assert!(q.contains(&format!("id=neq.{}", exclude)));
    }

    #[test]
    fn appointment_started_hours_earlier_still_conflicts_while_running() {
        // Began at 09:00 and runs ten hours; an 18:00 slot still overlaps.
        assert!(overlaps(at(18, 0), at(18, 30), at(9, 0), at(19, 0)));
    }

    #[test]
    fn patient_name_from_embedded_object() {
        let row = serde_json::json!({
            "paciente": { "nombre_completo": "Ana Pérez" }
        });
        assert_eq!(
            ConflictDetectionService::extract_patient_name(&row),
            "Ana Pérez"
        );
    }

    #[test]
    fn patient_name_from_embedded_array() {
        let row = serde_json::json!({
            "paciente": null,
            "offline_patient": [{ "nombre_completo": "Luis Díaz" }]
        });
        assert_eq!(
            ConflictDetectionService::extract_patient_name(&row),
            "Luis Díaz"
        );
    }

    #[test]
    fn patient_name_falls_back_when_missing() {
        let row = serde_json::json!({ "paciente": null, "offline_patient": null });
        assert_eq!(
            ConflictDetectionService::extract_patient_name(&row),
            "Paciente"
        );
    }
}
