use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use patient_cell::services::offline::OfflinePatientService;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentStatus, AppointmentType, BookingOutcome, CancelSeriesRequest,
    CreateAppointmentRequest, CreateSeriesRequest, DentalDetails, SchedulingError, SeriesCancelScope,
    SeriesOutcome,
};
use crate::services::activity::ActivityLogService;
use crate::services::conflict::ConflictDetectionService;
use crate::services::recurrence;

pub struct AppointmentWriterService {
    supabase: Arc<SupabaseClient>,
    conflicts: ConflictDetectionService,
    patients: OfflinePatientService,
    activity: ActivityLogService,
}

impl AppointmentWriterService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(supabase.clone()),
            patients: OfflinePatientService::new(supabase.clone()),
            activity: ActivityLogService::new(supabase.clone()),
            supabase,
        }
    }

    /// Book a single appointment.
    ///
    /// The appointment insert is the only step that can fail after the
    /// conflict check passes; the dental annex and the activity entry are
    /// secondary writes whose failure does not undo the booking. A lost
    /// annex is reported back through [`BookingOutcome::warning`].
    pub async fn create_appointment(
        &self,
        doctor_id: Uuid,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<BookingOutcome, SchedulingError> {
        let start_time = combine(request.date, request.time);
        validate_slot(start_time, request.duration_minutes)?;

        if request.appointment_type != AppointmentType::Telemedicine && request.office_id.is_none()
        {
            return Err(SchedulingError::ValidationError(
                "An office is required for in-person appointments".to_string(),
            ));
        }

        let resolved = self
            .patients
            .resolve_for_appointment(&doctor_id.to_string(), &request.patient, auth_token)
            .await?;

        self.conflicts
            .authoritative_check(
                doctor_id,
                start_time,
                request.duration_minutes,
                None,
                auth_token,
            )
            .await?;

        let appointment_id = Uuid::new_v4();
        let meeting_url = meeting_url_for(appointment_id, &request.appointment_type, resolved.is_offline);

        let row = json!({
            "id": appointment_id,
            "medico_id": doctor_id,
            "paciente_id": (!resolved.is_offline).then_some(resolved.patient_id),
            "offline_patient_id": resolved.is_offline.then_some(resolved.patient_id),
            "fecha_hora": start_time.to_rfc3339(),
            "duracion_minutos": request.duration_minutes,
            "tipo_cita": request.appointment_type,
            "status": AppointmentStatus::Pending,
            "motivo": request.reason,
            "notas_internas": request.internal_notes,
            "color": request.appointment_type.color(),
            "precio": request.price,
            "meeting_url": meeting_url.clone(),
            "metodo_pago": request.payment_method,
            "enviar_recordatorio": request.send_reminder,
            "location_id": request.office_id,
        });

        self.supabase
            .execute(Method::POST, "/rest/v1/appointments", Some(auth_token), Some(row))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Created appointment {} for doctor {} at {}",
            appointment_id, doctor_id, start_time
        );

        let (annex_saved, warning) = match &request.dental_details {
            Some(details) if !details.is_empty() => {
                self.save_dental_annex(appointment_id, details, auth_token)
                    .await
            }
            _ => (true, None),
        };

        self.activity
            .record(
                doctor_id,
                "appointment_created",
                format!("Cita creada para el {}", start_time.format("%d/%m/%Y %H:%M")),
                json!({ "appointment_id": appointment_id, "tipo_cita": request.appointment_type }),
                auth_token,
            )
            .await;

        Ok(BookingOutcome {
            appointment_id,
            meeting_url,
            annex_saved,
            warning,
        })
    }

    /// Book a recurring series. Occurrences are expanded up front, the first
    /// one is conflict-checked, and the whole batch is inserted in a single
    /// request tagged with the series id.
    pub async fn create_series(
        &self,
        doctor_id: Uuid,
        request: CreateSeriesRequest,
        auth_token: &str,
    ) -> Result<SeriesOutcome, SchedulingError> {
        let start_time = combine(request.starts_on, request.time);
        validate_slot(start_time, request.duration_minutes)?;

        if request.appointment_type != AppointmentType::Telemedicine && request.office_id.is_none()
        {
            return Err(SchedulingError::ValidationError(
                "An office is required for in-person appointments".to_string(),
            ));
        }

        let occurrences = recurrence::expand(start_time, &request.rule)?;
        if occurrences.is_empty() {
            return Err(SchedulingError::ValidationError(
                "The recurrence rule produces no occurrences".to_string(),
            ));
        }

        let resolved = self
            .patients
            .resolve_for_appointment(&doctor_id.to_string(), &request.patient, auth_token)
            .await?;

        self.conflicts
            .authoritative_check(
                doctor_id,
                occurrences[0],
                request.duration_minutes,
                None,
                auth_token,
            )
            .await?;

        let series_id = Uuid::new_v4();
        let series_row = json!({
            "id": series_id,
            "doctor_id": doctor_id,
            "paciente_id": (!resolved.is_offline).then_some(resolved.patient_id),
            "offline_patient_id": resolved.is_offline.then_some(resolved.patient_id),
            "tipo_cita": request.appointment_type,
            "duracion_minutos": request.duration_minutes,
            "recurrence_type": request.rule.cadence,
            "recurrence_interval": request.rule.interval,
            "recurrence_days": request.rule.weekdays.clone(),
            "starts_on": request.starts_on,
            "is_active": true,
            "occurrences_created": occurrences.len(),
        });

        self.supabase
            .execute(
                Method::POST,
                "/rest/v1/appointment_series",
                Some(auth_token),
                Some(series_row),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let rows: Vec<Value> = occurrences
            .iter()
            .enumerate()
            .map(|(index, occurrence)| {
                json!({
                    "id": Uuid::new_v4(),
                    "medico_id": doctor_id,
                    "paciente_id": (!resolved.is_offline).then_some(resolved.patient_id),
                    "offline_patient_id": resolved.is_offline.then_some(resolved.patient_id),
                    "fecha_hora": occurrence.to_rfc3339(),
                    "duracion_minutos": request.duration_minutes,
                    "tipo_cita": request.appointment_type,
                    "status": AppointmentStatus::Pending,
                    "motivo": request.reason.clone(),
                    "notas_internas": request.internal_notes.clone(),
                    "color": request.appointment_type.color(),
                    "precio": request.price,
                    "metodo_pago": request.payment_method.clone(),
                    "location_id": request.office_id,
                    "series_id": series_id,
                    "recurrence_index": index,
                })
            })
            .collect();

        let created = rows.len() as u32;
        self.supabase
            .execute(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(Value::Array(rows)),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Created series {} with {} occurrences for doctor {}",
            series_id, created, doctor_id
        );

        self.activity
            .record(
                doctor_id,
                "appointment_series_created",
                format!("Serie de {} citas creada", created),
                json!({ "series_id": series_id, "occurrences": created }),
                auth_token,
            )
            .await;

        Ok(SeriesOutcome { series_id, created })
    }

    pub async fn get_appointment(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&medico_id=eq.{}",
            appointment_id, doctor_id
        );

        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(SchedulingError::NotFound)
    }

    pub async fn list_appointments(
        &self,
        doctor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut query_parts = vec![format!("medico_id=eq.{}", doctor_id)];

        if let Some(from) = from {
            query_parts.push(format!(
                "fecha_hora=gte.{}",
                urlencoding::encode(&from.to_rfc3339())
            ));
        }
        if let Some(to) = to {
            query_parts.push(format!(
                "fecha_hora=lt.{}",
                urlencoding::encode(&to.to_rfc3339())
            ));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=fecha_hora.asc",
            query_parts.join("&")
        );

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }

    pub async fn cancel_appointment(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        reason: Option<String>,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let current = self.get_appointment(doctor_id, appointment_id, auth_token).await?;

        match current.status {
            AppointmentStatus::Completed => {
                return Err(SchedulingError::ValidationError(
                    "A completed appointment cannot be cancelled".to_string(),
                ))
            }
            AppointmentStatus::Cancelled => {
                return Err(SchedulingError::ValidationError(
                    "The appointment is already cancelled".to_string(),
                ))
            }
            _ => {}
        }

        self.update_status(doctor_id, appointment_id, AppointmentStatus::Cancelled, auth_token)
            .await?;

        self.activity
            .record(
                doctor_id,
                "appointment_cancelled",
                "Cita cancelada".to_string(),
                json!({ "appointment_id": appointment_id, "reason": reason }),
                auth_token,
            )
            .await;

        Ok(())
    }

    pub async fn confirm_appointment(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let current = self.get_appointment(doctor_id, appointment_id, auth_token).await?;

        if current.status != AppointmentStatus::Pending {
            return Err(SchedulingError::ValidationError(format!(
                "Only pending appointments can be confirmed (current status: {})",
                current.status
            )));
        }

        self.update_status(doctor_id, appointment_id, AppointmentStatus::Confirmed, auth_token)
            .await
    }

    pub async fn complete_appointment(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let current = self.get_appointment(doctor_id, appointment_id, auth_token).await?;

        match current.status {
            AppointmentStatus::Pending
            | AppointmentStatus::Confirmed
            | AppointmentStatus::InProgress => {}
            _ => {
                return Err(SchedulingError::ValidationError(format!(
                    "Appointment cannot be completed from status {}",
                    current.status
                )))
            }
        }

        self.update_status(doctor_id, appointment_id, AppointmentStatus::Completed, auth_token)
            .await
    }

    /// Cancel appointments in a series. `this_only` and `this_and_future`
    /// need the appointment the doctor acted on; `all` works from the
    /// series id alone. Completed occurrences are never touched.
    pub async fn cancel_series(
        &self,
        doctor_id: Uuid,
        series_id: Uuid,
        request: CancelSeriesRequest,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let cancelled = match request.scope {
            SeriesCancelScope::ThisOnly => {
                let appointment_id = request.from_appointment_id.ok_or_else(|| {
                    SchedulingError::ValidationError(
                        "from_appointment_id is required for this_only".to_string(),
                    )
                })?;
                self.cancel_appointment(doctor_id, appointment_id, request.reason.clone(), auth_token)
                    .await?;
                1
            }
            SeriesCancelScope::ThisAndFuture => {
                let appointment_id = request.from_appointment_id.ok_or_else(|| {
                    SchedulingError::ValidationError(
                        "from_appointment_id is required for this_and_future".to_string(),
                    )
                })?;
                let anchor = self.get_appointment(doctor_id, appointment_id, auth_token).await?;
                let path = format!(
                    "/rest/v1/appointments?series_id=eq.{}&medico_id=eq.{}&fecha_hora=gte.{}&status=in.(pendiente,confirmada)",
                    series_id,
                    doctor_id,
                    urlencoding::encode(&anchor.start_time.to_rfc3339())
                );
                self.cancel_matching(&path, auth_token).await?
            }
            SeriesCancelScope::All => {
                let path = format!(
                    "/rest/v1/appointments?series_id=eq.{}&medico_id=eq.{}&status=in.(pendiente,confirmada)",
                    series_id, doctor_id
                );
                let count = self.cancel_matching(&path, auth_token).await?;

                // The series itself is only closed when everything goes.
                let series_path = format!(
                    "/rest/v1/appointment_series?id=eq.{}&doctor_id=eq.{}",
                    series_id, doctor_id
                );
                if let Err(e) = self
                    .supabase
                    .execute(
                        Method::PATCH,
                        &series_path,
                        Some(auth_token),
                        Some(json!({ "is_active": false })),
                    )
                    .await
                {
                    warn!("Failed to close series {}: {}", series_id, e);
                }
                count
            }
        };

        self.activity
            .record(
                doctor_id,
                "appointment_series_cancelled",
                format!("{} citas de la serie canceladas", cancelled),
                json!({ "series_id": series_id, "scope": request.scope, "cancelled": cancelled }),
                auth_token,
            )
            .await;

        Ok(cancelled)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn update_status(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&medico_id=eq.{}",
            appointment_id, doctor_id
        );

        self.supabase
            .execute(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "status": status })),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!("Appointment {} moved to {}", appointment_id, status);
        Ok(())
    }

    async fn cancel_matching(&self, path: &str, auth_token: &str) -> Result<u32, SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                path,
                Some(auth_token),
                Some(json!({ "status": AppointmentStatus::Cancelled })),
                Some(headers),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(updated.len() as u32)
    }

    async fn save_dental_annex(
        &self,
        appointment_id: Uuid,
        details: &DentalDetails,
        auth_token: &str,
    ) -> (bool, Option<String>) {
        let body = json!({
            "appointment_id": appointment_id,
            "procedure_code": details.procedure_code,
            "procedure_name": details.procedure_name,
            "tooth_numbers": details.tooth_numbers,
            "surfaces": details.surfaces,
            "quadrant": details.quadrant,
            "requires_anesthesia": details.requires_anesthesia,
            "anesthesia_type": details.anesthesia_type,
            "requires_sedation": details.requires_sedation,
            "sedation_type": details.sedation_type,
            "notes": details.notes,
        });

        match self
            .supabase
            .execute(
                Method::POST,
                "/rest/v1/dental_appointment_details",
                Some(auth_token),
                Some(body),
            )
            .await
        {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(
                    "Dental annex for appointment {} was not saved: {}",
                    appointment_id, e
                );
                (
                    false,
                    Some(
                        "La cita fue creada pero los detalles dentales no se guardaron"
                            .to_string(),
                    ),
                )
            }
        }
    }

    pub fn conflict_service(&self) -> &ConflictDetectionService {
        &self.conflicts
    }
}

fn combine(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

fn validate_slot(start_time: DateTime<Utc>, duration_minutes: i32) -> Result<(), SchedulingError> {
    if duration_minutes <= 0 {
        return Err(SchedulingError::ValidationError(
            "Duration must be a positive number of minutes".to_string(),
        ));
    }
    if start_time <= Utc::now() {
        return Err(SchedulingError::ValidationError(
            "Appointments cannot be scheduled in the past".to_string(),
        ));
    }
    Ok(())
}

fn meeting_url_for(
    appointment_id: Uuid,
    appointment_type: &AppointmentType,
    is_offline_patient: bool,
) -> Option<String> {
    // Offline patients have no account to receive the link with.
    if *appointment_type == AppointmentType::Telemedicine && !is_offline_patient {
        let id = appointment_id.to_string();
        Some(format!("https://meet.jit.si/cita-{}", &id[..8]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn meeting_url_only_for_telemedicine_with_registered_patient() {
        let id = Uuid::parse_str("1f4a2c4e-0000-4000-8000-000000000001").unwrap();

        let url = meeting_url_for(id, &AppointmentType::Telemedicine, false);
        assert_eq!(url.as_deref(), Some("https://meet.jit.si/cita-1f4a2c4e"));

        assert!(meeting_url_for(id, &AppointmentType::Telemedicine, true).is_none());
        assert!(meeting_url_for(id, &AppointmentType::InPerson, false).is_none());
    }

    #[test]
    fn past_start_times_are_rejected() {
        let past = Utc::now() - chrono::Duration::hours(1);
        assert_matches!(
            validate_slot(past, 30),
            Err(SchedulingError::ValidationError(_))
        );
    }

    #[test]
    fn non_positive_duration_is_rejected() {
        let future = Utc::now() + chrono::Duration::days(1);
        assert!(validate_slot(future, 0).is_err());
        assert!(validate_slot(future, -15).is_err());
        assert!(validate_slot(future, 30).is_ok());
    }
}
