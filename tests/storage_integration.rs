use std::env;
use uuid::Uuid;

use prescreen_api::db::Database;
use prescreen_api::models::{
    BatchStatus, Bureau, FillProgramUpsert, MatchStatus, NewAuditEntry, NewBatch, NewLead, Tier,
};
use prescreen_api::pg_store::pg_stores;
use prescreen_api::store::{AuditStore, BatchStore, LeadStore, ProgramStore, ResultStore};

/// Integration smoke test for the Postgres stores, walking a program, batch,
/// lead, bureau result, and audit entry through their create/update cycle.
/// Marked ignored to avoid running against production by accident; set
/// TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn store_round_trip_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let stores = pg_stores(db.pool.clone());

    // Unique program name to avoid conflicts on repeated runs
    let name = format!("Smoke Fill {}", Uuid::new_v4());
    let program = stores
        .programs
        .upsert_fill_program(FillProgramUpsert {
            name: name.clone(),
            remote_program_id: None,
            config: serde_json::json!({ "smoke": true }),
            bureau: Bureau::Tu,
        })
        .await?;
    assert!(program.tu_enabled);
    assert!(program.remote_program_id.is_none());

    // Upserting again with a remote id updates the same row
    let program = stores
        .programs
        .upsert_fill_program(FillProgramUpsert {
            name: name.clone(),
            remote_program_id: Some("rf_smoke".to_string()),
            config: serde_json::json!({ "smoke": true }),
            bureau: Bureau::Tu,
        })
        .await?;
    assert_eq!(program.remote_program_id.as_deref(), Some("rf_smoke"));

    let batch = stores
        .batches
        .create(NewBatch {
            program_id: program.id,
            name: "smoke batch".to_string(),
            status: BatchStatus::Processing,
            total_records: 1,
            source_lead_ids: Vec::new(),
            submitted_by: "smoke-test".to_string(),
        })
        .await?;

    let lead = stores
        .leads
        .create(NewLead {
            batch_id: batch.id,
            program_id: program.id,
            input_id: 1,
            first_name: "Smoke".to_string(),
            last_name: format!("Test{}", Uuid::new_v4().simple()),
            middle_initial: None,
            address: "100 Main St".to_string(),
            address2: None,
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip: "62701".to_string(),
            ssn_encrypted: Some("deadbeef".to_string()),
            dob_encrypted: Some("deadbeef".to_string()),
            ssn_last_four: Some("6789".to_string()),
            middle_score: None,
            tier: Tier::Pending,
            is_qualified: false,
            match_status: MatchStatus::Matched,
            error_message: None,
        })
        .await?;

    // Upsert twice on the same (lead, bureau); one row, latest values win
    stores
        .results
        .upsert(lead.id, Bureau::Eq, Some(700), true, serde_json::json!({"score": 700}))
        .await?;
    stores
        .results
        .upsert(lead.id, Bureau::Eq, Some(715), true, serde_json::json!({"score": 715}))
        .await?;
    let rows = stores.results.list_for_lead(lead.id).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].credit_score, Some(715));

    stores
        .leads
        .update_scores(lead.id, None, Tier::Tier2, true)
        .await?;
    let updated = stores.leads.get(lead.id).await?.unwrap();
    assert_eq!(updated.tier, Tier::Tier2);
    assert!(updated.is_qualified);

    stores
        .batches
        .update_counts(batch.id, 1, 0)
        .await?;
    stores
        .batches
        .update_status(batch.id, BatchStatus::Completed)
        .await?;
    let finished = stores.batches.get(batch.id).await?.unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(finished.qualified_count, 1);
    assert_eq!(stores.leads.count_for_batch(batch.id).await?, 1);

    stores
        .audit
        .append(NewAuditEntry {
            action: "smoke_test".to_string(),
            actor: "smoke-test".to_string(),
            lead_id: Some(lead.id),
            batch_id: Some(batch.id),
            detail: serde_json::json!({ "ok": true }),
        })
        .await?;

    // Clean up the lead and its results
    stores.results.delete_for_lead(lead.id).await?;
    stores.leads.delete(lead.id).await?;
    assert_eq!(stores.leads.count_for_batch(batch.id).await?, 0);

    Ok(())
}
