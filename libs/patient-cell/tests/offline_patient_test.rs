use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use patient_cell::models::{NewOfflinePatient, PatientError, PatientSelection};
use patient_cell::services::offline::OfflinePatientService;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseRows, TestConfig};

fn service(supabase_url: &str) -> OfflinePatientService {
    let config = TestConfig {
        supabase_url: supabase_url.to_string(),
        ..TestConfig::default()
    }
    .to_app_config();
    OfflinePatientService::new(Arc::new(SupabaseClient::new(&config)))
}

fn new_patient(cedula: &str) -> PatientSelection {
    PatientSelection::New(NewOfflinePatient {
        nombre_completo: "Paciente Sin Cuenta".to_string(),
        cedula: cedula.to_string(),
        email: None,
    })
}

#[tokio::test]
async fn creates_offline_patient_on_first_booking() {
    let mock_server = MockServer::start().await;
    let new_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/offline_patients"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([{ "id": new_id }])),
        )
        .mount(&mock_server)
        .await;

    let service = service(&mock_server.uri());
    let doctor_id = Uuid::new_v4().to_string();

    let resolved = service
        .resolve_for_appointment(&doctor_id, &new_patient("V-12345678"), "token")
        .await
        .unwrap();

    assert_eq!(resolved.patient_id, new_id);
    assert!(resolved.is_offline);
}

#[tokio::test]
async fn duplicate_cedula_reuses_existing_row() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4().to_string();
    let existing_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/offline_patients"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(MockSupabaseRows::unique_violation_body()),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/offline_patients"))
        .and(query_param("cedula", "eq.V-12345678"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseRows::offline_patient_row(&existing_id.to_string(), &doctor_id, "V-12345678")
        ])))
        .mount(&mock_server)
        .await;

    let service = service(&mock_server.uri());

    let resolved = service
        .resolve_for_appointment(&doctor_id, &new_patient("V-12345678"), "token")
        .await
        .unwrap();

    assert_eq!(resolved.patient_id, existing_id);
    assert!(resolved.is_offline);
}

#[tokio::test]
async fn unrecoverable_duplicate_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/offline_patients"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(MockSupabaseRows::unique_violation_body()),
        )
        .mount(&mock_server)
        .await;

    // The recovery lookup comes back empty.
    Mock::given(method("GET"))
        .and(path("/rest/v1/offline_patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = service(&mock_server.uri());
    let doctor_id = Uuid::new_v4().to_string();

    let err = service
        .resolve_for_appointment(&doctor_id, &new_patient("V-12345678"), "token")
        .await
        .unwrap_err();

    assert_matches!(err, PatientError::DuplicateNotRecovered);
}

#[tokio::test]
async fn missing_cedula_is_rejected_before_any_request() {
    let mock_server = MockServer::start().await;
    let service = service(&mock_server.uri());
    let doctor_id = Uuid::new_v4().to_string();

    let err = service
        .resolve_for_appointment(&doctor_id, &new_patient("  "), "token")
        .await
        .unwrap_err();

    assert_matches!(err, PatientError::ValidationError(_));
}

#[tokio::test]
async fn existing_id_without_offline_row_is_registered_patient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/offline_patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = service(&mock_server.uri());
    let doctor_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4();

    let resolved = service
        .resolve_for_appointment(
            &doctor_id,
            &PatientSelection::Existing { patient_id },
            "token",
        )
        .await
        .unwrap();

    assert_eq!(resolved.patient_id, patient_id);
    assert!(!resolved.is_offline);
}
