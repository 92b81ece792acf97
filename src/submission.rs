/// Submission orchestrator: validates, deduplicates, and submits batches of
/// identity records to the matching vendor, persisting leads and per-bureau
/// results.
///
/// Workflow:
/// 1. Validate the request (1-1000 records, name/address fields, active program)
/// 2. Pre-submission dedup against already-screened identities
/// 3. Create the batch
/// 4. Submit to the vendor (or park leads as pending in manual mode)
/// 5. Persist leads + bureau results, compute middle score and tier
/// 6. Best-effort stale-lead cleanup across earlier failed batches
/// 7. Finalize batch status and write the audit entry
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{ssn_last_four, PiiCipher};
use crate::errors::AppError;
use crate::matching_client::{score_from_output, MatchRecord, MatchingClient};
use crate::models::{
    BatchStatus, MatchStatus, NewAuditEntry, NewBatch, NewLead, RecordInput, SkippedRecord,
    SubmitBatchResponse, Tier,
};
use crate::scoring::{evaluate, BureauScores, TierCutpoints};
use crate::store::{AuditStore, BatchStore, LeadStore, ProgramStore, ResultStore, Stores};

pub const MAX_BATCH_SIZE: usize = 1000;

pub struct SubmissionOrchestrator {
    stores: Stores,
    client: MatchingClient,
    cipher: Arc<dyn PiiCipher>,
    cutpoints: TierCutpoints,
}

impl SubmissionOrchestrator {
    pub fn new(
        stores: Stores,
        client: MatchingClient,
        cipher: Arc<dyn PiiCipher>,
        cutpoints: TierCutpoints,
    ) -> Self {
        Self {
            stores,
            client,
            cipher,
            cutpoints,
        }
    }

    pub async fn submit_batch(
        &self,
        program_id: Uuid,
        records: Vec<RecordInput>,
        batch_name: Option<String>,
        submitted_by: String,
    ) -> Result<SubmitBatchResponse, AppError> {
        // Step 1: validation, fail fast with no side effects
        validate_records(&records)?;

        let program = self
            .stores
            .programs
            .get(program_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Program {} not found", program_id)))?;
        if !program.is_active {
            return Err(AppError::BadRequest(format!(
                "Program '{}' is inactive",
                program.name
            )));
        }

        // Step 2: pre-submission dedup by case-insensitive first+last name.
        // Prevents re-paying the vendor for an identity already screened.
        let mut skipped: Vec<SkippedRecord> = Vec::new();
        let mut survivors: Vec<RecordInput> = Vec::new();
        for (idx, record) in records.into_iter().enumerate() {
            let already = self
                .stores
                .leads
                .exists_scored_identity(program.id, &record.first_name, &record.last_name)
                .await?;
            if already {
                skipped.push(SkippedRecord {
                    input_id: (idx + 1) as i32,
                    name: format!("{} {}", record.first_name, record.last_name),
                    reason: format!(
                        "{} {} was already screened in program '{}'",
                        record.first_name, record.last_name, program.name
                    ),
                });
            } else {
                survivors.push(record);
            }
        }

        if survivors.is_empty() {
            tracing::info!(
                "All {} record(s) skipped by dedup; nothing to submit",
                skipped.len()
            );
            return Ok(SubmitBatchResponse {
                batch_id: None,
                total_submitted: 0,
                qualified_count: 0,
                failed_count: 0,
                skipped,
                status: BatchStatus::Completed,
            });
        }

        // Step 3: create the batch sized to the surviving records
        let batch = self
            .stores
            .batches
            .create(NewBatch {
                program_id: program.id,
                name: batch_name.unwrap_or_else(|| {
                    format!("Prescreen {}", chrono::Utc::now().format("%Y-%m-%d %H:%M"))
                }),
                status: BatchStatus::Processing,
                total_records: survivors.len() as i32,
                source_lead_ids: Vec::new(),
                submitted_by: submitted_by.clone(),
            })
            .await?;

        // Step 4a: manual-processing mode for programs without a remote id
        let Some(remote_program_id) = program.remote_program_id.clone() else {
            tracing::info!(
                "Program '{}' has no remote id; parking {} lead(s) as pending",
                program.name,
                survivors.len()
            );
            for (pos, record) in survivors.iter().enumerate() {
                self.persist_lead(
                    batch.id,
                    program.id,
                    (pos + 1) as i32,
                    record,
                    None,
                    Tier::Pending,
                    false,
                    MatchStatus::Pending,
                    None,
                )
                .await?;
            }
            self.stores
                .batches
                .update_status(batch.id, BatchStatus::Pending)
                .await?;
            self.audit_submission(&batch.id, &submitted_by, survivors.len(), 0, 0, skipped.len())
                .await;

            return Ok(SubmitBatchResponse {
                batch_id: Some(batch.id),
                total_submitted: survivors.len() as i32,
                qualified_count: 0,
                failed_count: 0,
                skipped,
                status: BatchStatus::Pending,
            });
        };

        // Step 4b: format records 1-indexed and submit
        let match_records: Vec<MatchRecord> = survivors
            .iter()
            .enumerate()
            .map(|(pos, r)| MatchRecord {
                id: (pos + 1) as i64,
                first_name: r.first_name.clone(),
                last_name: r.last_name.clone(),
                middle_initial: r.middle_initial.clone(),
                address: r.address.clone(),
                address2: r.address2.clone(),
                city: r.city.clone(),
                state: r.state.clone(),
                zip: r.zip.clone(),
                ssn: r.ssn.clone(),
                dob: r.dob.clone(),
            })
            .collect();

        let outcome = match self
            .client
            .submit_records(&remote_program_id, &match_records)
            .await
        {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "matching service reported failure".to_string());
                self.fail_whole_batch(&batch.id, program.id, &survivors, &error)
                    .await?;
                return Err(AppError::ExternalApiError(error));
            }
            Err(e) => {
                // Nothing is silently dropped: every attempted record is
                // persisted as api_error before the error is surfaced.
                self.fail_whole_batch(&batch.id, program.id, &survivors, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        // Step 5: persist leads and per-bureau results
        let mut qualified_count = 0i32;
        let mut failed_count = 0i32;
        let mut seen: Vec<i64> = Vec::new();

        for q in &outcome.qualified {
            let Some(record) = survivors.get((q.input_id - 1) as usize) else {
                tracing::warn!("Vendor returned unknown input id {}", q.input_id);
                continue;
            };
            seen.push(q.input_id);

            let mut scores = BureauScores::default();
            for (bureau, output) in &q.outputs {
                scores.set(*bureau, score_from_output(output));
            }
            let eval = evaluate(scores, &self.cutpoints);

            let lead = self
                .persist_lead(
                    batch.id,
                    program.id,
                    q.input_id as i32,
                    record,
                    eval.middle_score,
                    eval.tier,
                    eval.is_qualified,
                    MatchStatus::Matched,
                    None,
                )
                .await?;

            // One result row per bureau actually queried (present in the
            // outputs map); is_hit records whether the bureau returned data.
            for (bureau, output) in &q.outputs {
                self.stores
                    .results
                    .upsert(
                        lead.id,
                        *bureau,
                        scores.get(*bureau),
                        !output.is_null(),
                        output.clone(),
                    )
                    .await?;
            }
            qualified_count += 1;
        }

        for f in &outcome.failed {
            let Some(record) = survivors.get((f.input_id - 1) as usize) else {
                tracing::warn!("Vendor returned unknown input id {}", f.input_id);
                continue;
            };
            seen.push(f.input_id);

            let match_status = if f.was_matched() {
                // Queried, no usable score
                MatchStatus::Matched
            } else {
                MatchStatus::NoMatch
            };
            let error_message = f.error.clone().or_else(|| f.reason.clone());
            self.persist_lead(
                batch.id,
                program.id,
                f.input_id as i32,
                record,
                None,
                Tier::Filtered,
                false,
                match_status,
                error_message,
            )
            .await?;
            failed_count += 1;
        }

        // Records the vendor dropped from both lists still get a row
        for (pos, record) in survivors.iter().enumerate() {
            let input_id = (pos + 1) as i64;
            if seen.contains(&input_id) {
                continue;
            }
            self.persist_lead(
                batch.id,
                program.id,
                input_id as i32,
                record,
                None,
                Tier::Filtered,
                false,
                MatchStatus::NoMatch,
                Some("Record missing from matching service response".to_string()),
            )
            .await?;
            failed_count += 1;
        }

        // Step 6: stale-lead cleanup, best effort
        if let Err(e) = self.cleanup_stale_leads(program.id, batch.id, &survivors).await {
            tracing::warn!("Stale-lead cleanup failed (non-fatal): {}", e);
        }

        // Step 7: finalize and audit
        let status = if failed_count == 0 {
            BatchStatus::Completed
        } else if qualified_count == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
        self.stores
            .batches
            .update_counts(batch.id, qualified_count, failed_count)
            .await?;
        self.stores.batches.update_status(batch.id, status).await?;
        self.audit_submission(
            &batch.id,
            &submitted_by,
            survivors.len(),
            qualified_count as usize,
            failed_count as usize,
            skipped.len(),
        )
        .await;

        tracing::info!(
            "Batch {} finished: {} qualified, {} failed, {} skipped, status {}",
            batch.id,
            qualified_count,
            failed_count,
            skipped.len(),
            status.as_str()
        );

        Ok(SubmitBatchResponse {
            batch_id: Some(batch.id),
            total_submitted: survivors.len() as i32,
            qualified_count,
            failed_count,
            skipped,
            status,
        })
    }

    /// Persists one lead, encrypting SSN/DOB. Plaintext PII never reaches the
    /// store or the logs.
    #[allow(clippy::too_many_arguments)]
    async fn persist_lead(
        &self,
        batch_id: Uuid,
        program_id: Uuid,
        input_id: i32,
        record: &RecordInput,
        middle_score: Option<i32>,
        tier: Tier,
        is_qualified: bool,
        match_status: MatchStatus,
        error_message: Option<String>,
    ) -> Result<crate::models::Lead, AppError> {
        let ssn_encrypted = match &record.ssn {
            Some(ssn) => Some(self.cipher.encrypt(ssn).await?),
            None => None,
        };
        let dob_encrypted = match &record.dob {
            Some(dob) => Some(self.cipher.encrypt(dob).await?),
            None => None,
        };
        let last_four = record.ssn.as_deref().and_then(ssn_last_four);

        self.stores
            .leads
            .create(NewLead {
                batch_id,
                program_id,
                input_id,
                first_name: record.first_name.clone(),
                last_name: record.last_name.clone(),
                middle_initial: record.middle_initial.clone(),
                address: record.address.clone(),
                address2: record.address2.clone(),
                city: record.city.clone(),
                state: record.state.to_uppercase(),
                zip: record.zip.clone(),
                ssn_encrypted,
                dob_encrypted,
                ssn_last_four: last_four,
                middle_score,
                tier,
                is_qualified,
                match_status,
                error_message,
            })
            .await
    }

    /// Persists every attempted record as api_error and marks the batch
    /// failed after an outright vendor failure.
    async fn fail_whole_batch(
        &self,
        batch_id: &Uuid,
        program_id: Uuid,
        survivors: &[RecordInput],
        error: &str,
    ) -> Result<(), AppError> {
        tracing::error!("Vendor submission failed for batch {}: {}", batch_id, error);
        for (pos, record) in survivors.iter().enumerate() {
            self.persist_lead(
                *batch_id,
                program_id,
                (pos + 1) as i32,
                record,
                None,
                Tier::Pending,
                false,
                MatchStatus::ApiError,
                Some(error.to_string()),
            )
            .await?;
        }
        self.stores
            .batches
            .update_counts(*batch_id, 0, survivors.len() as i32)
            .await?;
        self.stores
            .batches
            .update_status(*batch_id, BatchStatus::Failed)
            .await?;
        Ok(())
    }

    /// Deletes leads stuck in pending/api_error in other batches of the
    /// program that share a submitted identity's name, along with their
    /// results, and zeroes out old batches emptied by the deletion.
    async fn cleanup_stale_leads(
        &self,
        program_id: Uuid,
        current_batch: Uuid,
        survivors: &[RecordInput],
    ) -> Result<(), AppError> {
        let mut touched_batches: Vec<Uuid> = Vec::new();

        for record in survivors {
            let stale = self
                .stores
                .leads
                .find_stale_by_identity(
                    program_id,
                    &record.first_name,
                    &record.last_name,
                    current_batch,
                )
                .await?;
            for lead in stale {
                tracing::info!(
                    "Removing stale lead {} ({} {}) from batch {}",
                    lead.id,
                    lead.first_name,
                    lead.last_name,
                    lead.batch_id
                );
                self.stores.results.delete_for_lead(lead.id).await?;
                self.stores.leads.delete(lead.id).await?;
                if !touched_batches.contains(&lead.batch_id) {
                    touched_batches.push(lead.batch_id);
                }
            }
        }

        for batch_id in touched_batches {
            if self.stores.leads.count_for_batch(batch_id).await? == 0 {
                self.stores.batches.zero_counts(batch_id).await?;
            }
        }

        Ok(())
    }

    async fn audit_submission(
        &self,
        batch_id: &Uuid,
        actor: &str,
        total: usize,
        qualified: usize,
        failed: usize,
        skipped: usize,
    ) {
        let entry = NewAuditEntry {
            action: "batch_submitted".to_string(),
            actor: actor.to_string(),
            lead_id: None,
            batch_id: Some(*batch_id),
            detail: json!({
                "total_submitted": total,
                "qualified_count": qualified,
                "failed_count": failed,
                "skipped_count": skipped,
            }),
        };
        if let Err(e) = self.stores.audit.append(entry).await {
            tracing::warn!("Failed to write audit entry for batch {}: {}", batch_id, e);
        }
    }
}

/// Validates a submission request: 1-1000 records, each carrying the
/// name/address fields the vendor requires.
pub fn validate_records(records: &[RecordInput]) -> Result<(), AppError> {
    if records.is_empty() {
        return Err(AppError::BadRequest("At least one record required".to_string()));
    }
    if records.len() > MAX_BATCH_SIZE {
        return Err(AppError::BadRequest(format!(
            "Batch size {} exceeds the {}-record limit",
            records.len(),
            MAX_BATCH_SIZE
        )));
    }

    let state_re = Regex::new(r"^[A-Za-z]{2}$").unwrap();
    let zip_re = Regex::new(r"^\d{5}(-\d{4})?$").unwrap();

    for (idx, record) in records.iter().enumerate() {
        let input_id = idx + 1;
        if record.first_name.trim().is_empty() || record.last_name.trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "Record {}: first and last name are required",
                input_id
            )));
        }
        if record.address.trim().is_empty() || record.city.trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "Record {}: address and city are required",
                input_id
            )));
        }
        if !state_re.is_match(&record.state) {
            return Err(AppError::BadRequest(format!(
                "Record {}: state must be a two-letter code",
                input_id
            )));
        }
        if !zip_re.is_match(&record.zip) {
            return Err(AppError::BadRequest(format!(
                "Record {}: zip must be 5 digits (optionally ZIP+4)",
                input_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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
            ssn: None,
            dob: None,
        }
    }

    #[test]
    fn rejects_empty_and_oversized_batches() {
        assert!(validate_records(&[]).is_err());
        let records: Vec<RecordInput> = (0..=MAX_BATCH_SIZE).map(|i| record("A", &format!("B{}", i))).collect();
        assert!(validate_records(&records).is_err());
    }

    #[test]
    fn rejects_bad_state_and_zip() {
        let mut r = record("Jane", "Doe");
        r.state = "Illinois".to_string();
        assert!(validate_records(&[r]).is_err());

        let mut r = record("Jane", "Doe");
        r.zip = "627".to_string();
        assert!(validate_records(&[r]).is_err());
    }

    #[test]
    fn accepts_zip_plus_four() {
        let mut r = record("Jane", "Doe");
        r.zip = "62701-4321".to_string();
        assert!(validate_records(&[r]).is_ok());
    }

    #[test]
    fn rejects_missing_names() {
        let mut r = record(" ", "Doe");
        r.first_name = " ".to_string();
        assert!(validate_records(&[r]).is_err());
    }
}
