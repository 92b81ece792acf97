/// Integration tests for the matching vendor client with mocked HTTP
/// responses. Cover the wire contract: auth header, envelope parsing, and
/// error mapping for non-2xx responses.
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescreen_api::errors::AppError;
use prescreen_api::matching_client::{MatchRecord, MatchingClient};
use prescreen_api::models::Bureau;

fn client(base_url: &str) -> MatchingClient {
    MatchingClient::new(base_url.to_string(), "test_key".to_string()).unwrap()
}

fn sample_record(id: i64) -> MatchRecord {
    MatchRecord {
        id,
        first_name: "Alice".to_string(),
        last_name: "Anders".to_string(),
        middle_initial: None,
        address: "100 Main St".to_string(),
        address2: None,
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        ssn: Some("123-45-6789".to_string()),
        dob: Some("1985-06-15".to_string()),
    }
}

#[tokio::test]
async fn submit_records_parses_qualified_and_failed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .and(header("x-api-key", "test_key"))
        .and(body_partial_json(json!({
            "records": [ { "id": 1, "firstName": "Alice", "lastName": "Anders" } ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [
                {
                    "inputId": 1,
                    "outputs": { "eq": { "score": 712 }, "tu": null },
                    "segmentName": "prime"
                }
            ],
            "failed": [
                { "inputId": 2, "match": "no_match", "reason": "identity not found" }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let outcome = client(&mock_server.uri())
        .submit_records("rp_main", &[sample_record(1)])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.qualified.len(), 1);
    let q = &outcome.qualified[0];
    assert_eq!(q.input_id, 1);
    assert_eq!(q.outputs[&Bureau::Eq]["score"], json!(712));
    // A null output key means queried-with-no-data, not absent
    assert!(q.outputs.contains_key(&Bureau::Tu));
    assert!(q.outputs[&Bureau::Tu].is_null());
    assert_eq!(q.segment_name.as_deref(), Some("prime"));

    assert_eq!(outcome.failed.len(), 1);
    assert!(!outcome.failed[0].was_matched());
}

#[tokio::test]
async fn non_success_status_maps_to_external_api_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server.uri())
        .submit_records("rp_main", &[sample_record(1)])
        .await
        .unwrap_err();

    match err {
        AppError::ExternalApiError(msg) => {
            assert!(msg.contains("503"));
            assert!(msg.contains("maintenance window"));
        }
        other => panic!("expected ExternalApiError, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_response_body_is_an_external_api_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server.uri())
        .submit_records("rp_main", &[sample_record(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalApiError(_)));
}

#[tokio::test]
async fn get_program_returns_remote_config() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/programs/rp_main"))
        .and(header("x-api-key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "program": {
                "id": "rp_main",
                "name": "Mortgage Prescreen",
                "bureaus": { "eq": { "enabled": true } }
            }
        })))
        .mount(&mock_server)
        .await;

    let envelope = client(&mock_server.uri()).get_program("rp_main").await.unwrap();
    assert!(envelope.success);
    let program = envelope.program.unwrap();
    assert_eq!(program["id"], json!("rp_main"));
}

#[tokio::test]
async fn create_program_posts_payload_and_parses_envelope() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs"))
        .and(header("x-api-key", "test_key"))
        .and(body_partial_json(json!({ "name": "Bureau Fill - EQ" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "program": { "id": "rf_eq_new" }
        })))
        .mount(&mock_server)
        .await;

    let envelope = client(&mock_server.uri())
        .create_program(&json!({ "name": "Bureau Fill - EQ" }))
        .await
        .unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.program.unwrap()["id"], json!("rf_eq_new"));
}

#[tokio::test]
async fn vendor_level_failure_envelope_is_not_an_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "invalid score version"
        })))
        .mount(&mock_server)
        .await;

    // 200 with success=false is a semantic rejection; callers decide what to
    // do with it rather than the transport layer.
    let envelope = client(&mock_server.uri())
        .create_program(&json!({ "name": "bad" }))
        .await
        .unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.error.as_deref(), Some("invalid score version"));
}
