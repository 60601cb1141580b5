use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "doctor@example.com".to_string(),
            role: "doctor".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn secretary(email: &str) -> Self {
        Self::new(email, "secretaria")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows matching the production schema (Spanish column names).
pub struct MockSupabaseRows;

impl MockSupabaseRows {
    pub fn appointment_row(
        doctor_id: &str,
        patient_id: &str,
        fecha_hora: DateTime<Utc>,
        duracion_minutos: i32,
        status: &str,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "medico_id": doctor_id,
            "paciente_id": patient_id,
            "offline_patient_id": null,
            "fecha_hora": fecha_hora.to_rfc3339(),
            "duracion_minutos": duracion_minutos,
            "tipo_cita": "presencial",
            "status": status,
            "motivo": "Consulta general",
            "notas_internas": null,
            "color": "#3B82F6",
            "precio": null,
            "meeting_url": null,
            "metodo_pago": "pendiente",
            "enviar_recordatorio": true,
            "location_id": Uuid::new_v4(),
            "series_id": null,
            "recurrence_index": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    /// Row shape returned by the conflict queries, with embedded patient names.
    pub fn conflict_row(
        fecha_hora: DateTime<Utc>,
        duracion_minutos: i32,
        patient_name: &str,
    ) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "fecha_hora": fecha_hora.to_rfc3339(),
            "duracion_minutos": duracion_minutos,
            "motivo": "Control",
            "paciente": { "nombre_completo": patient_name },
            "offline_patient": null
        })
    }

    pub fn offline_patient_row(id: &str, doctor_id: &str, cedula: &str) -> Value {
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "nombre_completo": "Paciente Sin Cuenta",
            "cedula": cedula,
            "email": null,
            "status": "offline",
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn unique_violation_body() -> Value {
        json!({
            "code": "23505",
            "details": "Key (doctor_id, cedula) already exists.",
            "hint": null,
            "message": "duplicate key value violates unique constraint \"offline_patients_doctor_id_cedula_key\""
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert!(app_config.is_configured());
    }

    #[test]
    fn test_token_roundtrip() {
        let config = TestConfig::default();
        let user = TestUser::doctor("dr@example.com");
        let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);

        let validated = validate_token(&token, &config.jwt_secret).expect("token should validate");
        assert_eq!(validated.id, user.id);
        assert_eq!(validated.role.as_deref(), Some("doctor"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = TestConfig::default();
        let user = TestUser::default();
        let token = JwtTestUtils::create_expired_token(&user, &config.jwt_secret);

        assert_matches!(validate_token(&token, &config.jwt_secret), Err(_));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let config = TestConfig::default();
        let user = TestUser::default();
        let token = JwtTestUtils::create_invalid_signature_token(&user);

        assert_matches!(validate_token(&token, &config.jwt_secret), Err(_));
    }
}
