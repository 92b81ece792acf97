/// Integration tests for the batch submission workflow with a mocked
/// matching vendor. Exercise validation, dedup, scoring, failure handling,
/// and stale-lead cleanup against the in-memory stores.
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescreen_api::crypto::{KeystreamCipher, PiiCipher};
use prescreen_api::matching_client::MatchingClient;
use prescreen_api::mem_store::MemStores;
use prescreen_api::models::{
    Batch, BatchStatus, Bureau, Lead, MatchStatus, Program, RecordInput, Tier,
};
use prescreen_api::scoring::TierCutpoints;
use prescreen_api::store::BatchStore;
use prescreen_api::submission::SubmissionOrchestrator;

fn test_cipher() -> Arc<dyn PiiCipher> {
    Arc::new(KeystreamCipher::from_hex_key(&"ab".repeat(32)).unwrap())
}

fn seed_program(mem: &MemStores, remote_id: Option<&str>) -> Program {
    let program = Program {
        id: Uuid::new_v4(),
        name: "Mortgage Prescreen".to_string(),
        remote_program_id: remote_id.map(str::to_string),
        config: json!({}),
        eq_enabled: true,
        tu_enabled: true,
        ex_enabled: true,
        is_active: true,
        created_at: Utc::now(),
        updated_at: None,
    };
    mem.programs.insert(program.clone());
    program
}

fn record(first: &str, last: &str) -> RecordInput {
    RecordInput {
        first_name: first.to_string(),
        last_name: last.to_string(),
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

fn orchestrator(mem: &MemStores, base_url: &str) -> SubmissionOrchestrator {
    let client = MatchingClient::new(base_url.to_string(), "test_key".to_string()).unwrap();
    SubmissionOrchestrator::new(mem.stores(), client, test_cipher(), TierCutpoints::default())
}

fn find_lead<'a>(leads: &'a [Lead], first: &str) -> &'a Lead {
    leads.iter().find(|l| l.first_name == first).unwrap()
}

#[tokio::test]
async fn mixed_batch_scores_partials_and_filters_failures() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .and(header("x-api-key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [
                {
                    "inputId": 1,
                    "outputs": {
                        "eq": { "score": 700 },
                        "tu": { "score": 725 },
                        "ex": { "score": 710 }
                    },
                    "segmentName": "prime"
                },
                {
                    "inputId": 2,
                    "outputs": {
                        "eq": { "score": 690 },
                        "tu": null
                    }
                }
            ],
            "failed": [
                { "inputId": 3, "match": "no_match", "reason": "identity not found" }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));
    let orchestrator = orchestrator(&mem, &mock_server.uri());

    let response = orchestrator
        .submit_batch(
            program.id,
            vec![
                record("Alice", "Anders"),
                record("Bob", "Baker"),
                record("Cara", "Cole"),
            ],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(response.total_submitted, 3);
    assert_eq!(response.qualified_count, 2);
    assert_eq!(response.failed_count, 1);
    assert_eq!(response.status, BatchStatus::Partial);

    let leads = mem.leads.all();
    assert_eq!(leads.len(), 3);

    // Full triple: middle score is the median
    let alice = find_lead(&leads, "Alice");
    assert_eq!(alice.middle_score, Some(710));
    assert_eq!(alice.tier, Tier::Tier2);
    assert!(alice.is_qualified);
    assert_eq!(alice.match_status, MatchStatus::Matched);

    // Partial: no middle score, tiered from the max available
    let bob = find_lead(&leads, "Bob");
    assert_eq!(bob.middle_score, None);
    assert_eq!(bob.tier, Tier::Tier2);
    assert!(bob.is_qualified);

    // Failed no-match: filtered, no score
    let cara = find_lead(&leads, "Cara");
    assert_eq!(cara.tier, Tier::Filtered);
    assert_eq!(cara.match_status, MatchStatus::NoMatch);
    assert!(!cara.is_qualified);
    assert_eq!(cara.error_message.as_deref(), Some("identity not found"));

    // One result row per queried bureau; a null output is a non-hit row
    let results = mem.results.all();
    let alice_rows: Vec<_> = results.iter().filter(|r| r.lead_id == alice.id).collect();
    assert_eq!(alice_rows.len(), 3);
    let bob_rows: Vec<_> = results.iter().filter(|r| r.lead_id == bob.id).collect();
    assert_eq!(bob_rows.len(), 2);
    let bob_tu = bob_rows.iter().find(|r| r.bureau == Bureau::Tu).unwrap();
    assert!(!bob_tu.is_hit);
    assert_eq!(bob_tu.credit_score, None);
}

#[tokio::test]
async fn submitted_records_are_one_indexed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .and(body_partial_json(json!({
            "records": [ { "id": 1, "firstName": "Alice" } ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [],
            "failed": [ { "inputId": 1, "match": "no_match" } ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));
    orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn dedup_skips_already_screened_identities() {
    let mock_server = MockServer::start().await;
    // No vendor call should ever happen
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));

    // Alice was already screened and tiered in an earlier batch
    mem.leads.insert(Lead {
        id: Uuid::new_v4(),
        batch_id: Uuid::new_v4(),
        program_id: program.id,
        input_id: 1,
        first_name: "alice".to_string(),
        last_name: "ANDERS".to_string(),
        middle_initial: None,
        address: "100 Main St".to_string(),
        address2: None,
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        ssn_encrypted: None,
        dob_encrypted: None,
        ssn_last_four: None,
        middle_score: Some(705),
        tier: Tier::Tier2,
        is_qualified: true,
        match_status: MatchStatus::Matched,
        error_message: None,
        notes: None,
        created_at: Utc::now(),
        updated_at: None,
    });

    let response = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(response.batch_id, None);
    assert_eq!(response.total_submitted, 0);
    assert_eq!(response.skipped.len(), 1);
    assert_eq!(response.skipped[0].input_id, 1);
    assert!(response.skipped[0].reason.contains("already screened"));
    assert_eq!(response.status, BatchStatus::Completed);
    // No new lead was created
    assert_eq!(mem.leads.all().len(), 1);
}

#[tokio::test]
async fn vendor_failure_parks_all_leads_as_api_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));

    let result = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders"), record("Bob", "Baker")],
            None,
            "tester".to_string(),
        )
        .await;
    assert!(result.is_err());

    // Every attempted record is persisted and resubmittable
    let leads = mem.leads.all();
    assert_eq!(leads.len(), 2);
    for lead in &leads {
        assert_eq!(lead.match_status, MatchStatus::ApiError);
        assert_eq!(lead.tier, Tier::Pending);
        assert!(lead.error_message.is_some());
    }

    let batch = mem
        .batches
        .get(leads[0].batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
}

#[tokio::test]
async fn api_error_leads_do_not_block_resubmission() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [
                { "inputId": 1, "outputs": { "eq": { "score": 731 } } }
            ],
            "failed": []
        })))
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));

    // Earlier failed attempt for the same identity
    let stale_batch = Batch {
        id: Uuid::new_v4(),
        program_id: program.id,
        name: "old".to_string(),
        status: BatchStatus::Failed,
        total_records: 1,
        qualified_count: 0,
        failed_count: 1,
        source_lead_ids: Vec::new(),
        submitted_by: "tester".to_string(),
        created_at: Utc::now(),
        updated_at: None,
    };
    mem.batches.insert(stale_batch.clone());
    let stale_lead_id = Uuid::new_v4();
    mem.leads.insert(Lead {
        id: stale_lead_id,
        batch_id: stale_batch.id,
        program_id: program.id,
        input_id: 1,
        first_name: "Alice".to_string(),
        last_name: "Anders".to_string(),
        middle_initial: None,
        address: "100 Main St".to_string(),
        address2: None,
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        ssn_encrypted: None,
        dob_encrypted: None,
        ssn_last_four: None,
        middle_score: None,
        tier: Tier::Pending,
        is_qualified: false,
        match_status: MatchStatus::ApiError,
        error_message: Some("upstream down".to_string()),
        notes: None,
        created_at: Utc::now(),
        updated_at: None,
    });

    let response = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(response.total_submitted, 1);
    assert_eq!(response.qualified_count, 1);
    assert!(response.skipped.is_empty());

    // The stale lead was cleaned up and its emptied batch zeroed
    let leads = mem.leads.all();
    assert_eq!(leads.len(), 1);
    assert_ne!(leads[0].id, stale_lead_id);
    let old = mem.batches.get(stale_batch.id).await.unwrap().unwrap();
    assert_eq!(old.total_records, 0);
    assert_eq!(old.failed_count, 0);
}

#[tokio::test]
async fn program_without_remote_id_parks_leads_for_manual_processing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, None);

    let response = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, BatchStatus::Pending);
    assert_eq!(response.total_submitted, 1);
    assert_eq!(response.qualified_count, 0);

    let leads = mem.leads.all();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].tier, Tier::Pending);
    assert_eq!(leads[0].match_status, MatchStatus::Pending);
}

#[tokio::test]
async fn pii_is_encrypted_at_rest() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [
                { "inputId": 1, "outputs": { "eq": { "score": 700 } } }
            ],
            "failed": []
        })))
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));
    orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    let lead = &mem.leads.all()[0];
    let ssn_encrypted = lead.ssn_encrypted.as_deref().unwrap();
    assert!(!ssn_encrypted.contains("123-45-6789"));
    assert_eq!(lead.ssn_last_four.as_deref(), Some("6789"));

    // The ciphertext round-trips with the same key
    let cipher = test_cipher();
    assert_eq!(cipher.decrypt(ssn_encrypted).await.unwrap(), "123-45-6789");
}

#[tokio::test]
async fn validation_rejects_before_any_side_effect() {
    let mock_server = MockServer::start().await;
    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));

    let mut bad = record("Alice", "Anders");
    bad.zip = "not-a-zip".to_string();

    let result = orchestrator(&mem, &mock_server.uri())
        .submit_batch(program.id, vec![bad], None, "tester".to_string())
        .await;
    assert!(result.is_err());
    assert!(mem.leads.all().is_empty());
}

#[tokio::test]
async fn inactive_program_is_rejected() {
    let mock_server = MockServer::start().await;
    let mem = MemStores::new();
    let mut program = seed_program(&mem, Some("rp_main"));
    program.is_active = false;
    // Re-seed as inactive under a different name to avoid the active copy
    program.id = Uuid::new_v4();
    program.name = "Retired Program".to_string();
    mem.programs.insert(program.clone());

    let result = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn audit_entry_written_for_submission() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/programs/rp_main/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "qualified": [
                { "inputId": 1, "outputs": { "eq": { "score": 700 } } }
            ],
            "failed": []
        })))
        .mount(&mock_server)
        .await;

    let mem = MemStores::new();
    let program = seed_program(&mem, Some("rp_main"));
    let response = orchestrator(&mem, &mock_server.uri())
        .submit_batch(
            program.id,
            vec![record("Alice", "Anders")],
            None,
            "tester".to_string(),
        )
        .await
        .unwrap();

    let entries = mem.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "batch_submitted");
    assert_eq!(entries[0].actor, "tester");
    assert_eq!(entries[0].batch_id, response.batch_id);
    assert_eq!(entries[0].detail["qualified_count"], json!(1));
}
