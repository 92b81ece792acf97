/// Bureau fill orchestrator: finds matched leads with missing per-bureau
/// results and re-queries each missing bureau through its single-bureau fill
/// program.
///
/// Execution is sequential per bureau, and failures are isolated at two
/// levels: a bureau whose fill program or vendor call fails reports an error
/// in its own summary without touching the other bureaus, and a lead whose
/// PII fails to decrypt is skipped without aborting its bureau's pass.
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::PiiCipher;
use crate::errors::{AppError, ResultExt};
use crate::matching_client::{score_from_output, MatchRecord, MatchingClient};
use crate::models::{
    BatchStatus, Bureau, BureauFillSummary, FillExecuteRequest, FillPreviewLead,
    FillPreviewResponse, FillPreviewSummary, FillSelection, Lead, NewAuditEntry, NewBatch,
};
use crate::programs::FillProgramRegistry;
use crate::scoring::{evaluate, BureauScores, TierCutpoints};
use crate::store::{AuditStore, BatchStore, LeadStore, ResultStore, Stores};

pub struct FillOrchestrator {
    stores: Stores,
    client: MatchingClient,
    cipher: Arc<dyn PiiCipher>,
    registry: Arc<FillProgramRegistry>,
    cutpoints: TierCutpoints,
}

impl FillOrchestrator {
    pub fn new(
        stores: Stores,
        client: MatchingClient,
        cipher: Arc<dyn PiiCipher>,
        registry: Arc<FillProgramRegistry>,
        cutpoints: TierCutpoints,
    ) -> Self {
        Self {
            stores,
            client,
            cipher,
            registry,
            cutpoints,
        }
    }

    /// Read-only scan: every matched lead with retained PII and fewer than
    /// three bureau result rows, with the bureaus it is missing.
    pub async fn scan(&self) -> Result<FillPreviewResponse, AppError> {
        let candidates = self.scan_missing().await?;

        let mut summary = FillPreviewSummary {
            total_leads_with_missing: candidates.len(),
            missing_eq: 0,
            missing_tu: 0,
            missing_ex: 0,
        };
        let mut leads = Vec::with_capacity(candidates.len());
        for (lead, missing) in &candidates {
            for bureau in missing {
                match bureau {
                    Bureau::Eq => summary.missing_eq += 1,
                    Bureau::Tu => summary.missing_tu += 1,
                    Bureau::Ex => summary.missing_ex += 1,
                }
            }
            leads.push(FillPreviewLead {
                lead_id: lead.id,
                first_name: lead.first_name.clone(),
                last_name: lead.last_name.clone(),
                ssn_last_four: lead.ssn_last_four.clone(),
                tier: lead.tier,
                missing_bureaus: missing.clone(),
            });
        }

        Ok(FillPreviewResponse { summary, leads })
    }

    /// Executes a fill run, one bureau at a time in eq/tu/ex order.
    pub async fn execute(
        &self,
        request: FillExecuteRequest,
    ) -> Result<crate::models::FillExecuteResponse, AppError> {
        let executed_by = request
            .executed_by
            .clone()
            .unwrap_or_else(|| "system".to_string());
        let candidates = self.scan_missing().await?;
        let candidates = apply_selections(candidates, request.selections.as_deref());

        let mut results: BTreeMap<Bureau, BureauFillSummary> = BTreeMap::new();
        let mut total_updated = 0usize;

        for bureau in Bureau::ALL {
            let group: Vec<&Lead> = candidates
                .iter()
                .filter(|(_, missing)| missing.contains(&bureau))
                .map(|(lead, _)| lead)
                .collect();
            if group.is_empty() {
                // Every bureau reports, even with nothing to do; callers see
                // the full eq/tu/ex shape on each run.
                results.insert(bureau, BureauFillSummary::empty());
                continue;
            }

            let summary = self.fill_bureau(bureau, &group, &executed_by).await;
            total_updated += summary.updated;
            results.insert(bureau, summary);
        }

        self.audit_fill(&executed_by, &results).await;

        Ok(crate::models::FillExecuteResponse {
            results,
            total_updated,
        })
    }

    /// One bureau's pass. Never returns an error; anything that stops the
    /// pass lands in the summary's `error` so other bureaus still run.
    async fn fill_bureau(
        &self,
        bureau: Bureau,
        leads: &[&Lead],
        executed_by: &str,
    ) -> BureauFillSummary {
        let program = match self.registry.get_or_create(bureau).await {
            Ok(Some(program)) => program,
            Ok(None) => {
                return BureauFillSummary::unavailable(format!(
                    "No fill program available for {}",
                    bureau.label()
                ))
            }
            Err(e) => return BureauFillSummary::unavailable(e.to_string()),
        };
        let Some(remote_program_id) = program.remote_program_id.clone() else {
            return BureauFillSummary::unavailable(format!(
                "Fill program for {} has no remote id",
                bureau.label()
            ));
        };

        // Decrypt PII per lead; a lead that fails to decrypt is skipped, not
        // fatal to the pass.
        let mut submitted: Vec<&Lead> = Vec::with_capacity(leads.len());
        let mut records: Vec<MatchRecord> = Vec::with_capacity(leads.len());
        for lead in leads {
            match self.decrypt_record(lead, (submitted.len() + 1) as i64).await {
                Ok(record) => {
                    submitted.push(lead);
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!("Skipping lead {} in {} fill: {}", lead.id, bureau, e);
                }
            }
        }
        if records.is_empty() {
            return BureauFillSummary::unavailable("No leads could be prepared for submission");
        }

        let batch = match self
            .stores
            .batches
            .create(NewBatch {
                program_id: program.id,
                name: format!(
                    "Bureau Fill {} {}",
                    bureau.label(),
                    chrono::Utc::now().format("%Y-%m-%d %H:%M")
                ),
                status: BatchStatus::Processing,
                total_records: records.len() as i32,
                source_lead_ids: submitted.iter().map(|l| l.id).collect(),
                submitted_by: executed_by.to_string(),
            })
            .await
        {
            Ok(batch) => batch,
            Err(e) => return BureauFillSummary::unavailable(e.to_string()),
        };

        let outcome = match self.client.submit_records(&remote_program_id, &records).await {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "matching service reported failure".to_string());
                return self.fail_pass(batch.id, records.len(), error).await;
            }
            Err(e) => return self.fail_pass(batch.id, records.len(), e.to_string()).await,
        };

        let mut summary = BureauFillSummary {
            attempted: records.len(),
            updated: 0,
            no_hit: 0,
            batch_id: Some(batch.id),
            error: None,
        };

        for q in &outcome.qualified {
            let Some(lead) = submitted.get((q.input_id - 1) as usize) else {
                tracing::warn!("Fill response referenced unknown input id {}", q.input_id);
                continue;
            };
            let output = q.outputs.get(&bureau).cloned().unwrap_or(Value::Null);
            let score = score_from_output(&output);
            let is_hit = !output.is_null();

            if let Err(e) = self
                .stores
                .results
                .upsert(lead.id, bureau, score, is_hit, output)
                .await
            {
                tracing::warn!("Failed to store {} result for lead {}: {}", bureau, lead.id, e);
                continue;
            }

            if is_hit && score.is_some() {
                // A hit that fails to rescore is counted in neither bucket;
                // no_hit means the bureau confirmed it has no data.
                match self.rescore_lead(lead.id).await {
                    Ok(()) => summary.updated += 1,
                    Err(e) => {
                        tracing::warn!("Failed to rescore lead {}: {}", lead.id, e);
                    }
                }
            } else {
                summary.no_hit += 1;
            }
        }

        for f in &outcome.failed {
            let Some(lead) = submitted.get((f.input_id - 1) as usize) else {
                tracing::warn!("Fill response referenced unknown input id {}", f.input_id);
                continue;
            };
            // Queried-with-no-data is recorded so the next scan skips it.
            let raw = json!({
                "error": f.error,
                "reason": f.reason,
            });
            if let Err(e) = self
                .stores
                .results
                .upsert(lead.id, bureau, None, false, raw)
                .await
            {
                tracing::warn!("Failed to store {} miss for lead {}: {}", bureau, lead.id, e);
                continue;
            }
            summary.no_hit += 1;
        }

        let finalize = async {
            self.stores
                .batches
                .update_counts(batch.id, summary.updated as i32, summary.no_hit as i32)
                .await?;
            self.stores
                .batches
                .update_status(batch.id, BatchStatus::Completed)
                .await
        };
        if let Err(e) = finalize.await {
            tracing::warn!("Failed to finalize fill batch {}: {}", batch.id, e);
        }

        tracing::info!(
            "{} fill pass: {} attempted, {} updated, {} no-hit",
            bureau.label(),
            summary.attempted,
            summary.updated,
            summary.no_hit
        );
        summary
    }

    /// Rebuilds a lead's scores from all of its stored bureau results and
    /// rewrites middle score, tier, and qualification.
    async fn rescore_lead(&self, lead_id: Uuid) -> Result<(), AppError> {
        let rows = self.stores.results.list_for_lead(lead_id).await?;
        let mut scores = BureauScores::default();
        for row in &rows {
            if row.is_hit {
                if let Some(score) = row.credit_score {
                    scores.set(row.bureau, Some(score));
                }
            }
        }
        let eval = evaluate(scores, &self.cutpoints);
        self.stores
            .leads
            .update_scores(lead_id, eval.middle_score, eval.tier, eval.is_qualified)
            .await
    }

    async fn decrypt_record(&self, lead: &Lead, id: i64) -> Result<MatchRecord, AppError> {
        let ssn_encrypted = lead
            .ssn_encrypted
            .as_deref()
            .ok_or_else(|| AppError::InternalError("Lead has no encrypted SSN".to_string()))?;
        let dob_encrypted = lead
            .dob_encrypted
            .as_deref()
            .ok_or_else(|| AppError::InternalError("Lead has no encrypted DOB".to_string()))?;
        let ssn = self.cipher.decrypt(ssn_encrypted).await?;
        let dob = self.cipher.decrypt(dob_encrypted).await?;

        Ok(MatchRecord {
            id,
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            middle_initial: lead.middle_initial.clone(),
            address: lead.address.clone(),
            address2: lead.address2.clone(),
            city: lead.city.clone(),
            state: lead.state.clone(),
            zip: lead.zip.clone(),
            ssn: Some(ssn),
            dob: Some(dob),
        })
    }

    async fn fail_pass(
        &self,
        batch_id: Uuid,
        attempted: usize,
        error: String,
    ) -> BureauFillSummary {
        tracing::error!("Fill batch {} failed: {}", batch_id, error);
        if let Err(e) = self
            .stores
            .batches
            .update_status(batch_id, BatchStatus::Failed)
            .await
        {
            tracing::warn!("Failed to mark fill batch {} failed: {}", batch_id, e);
        }
        BureauFillSummary {
            attempted,
            updated: 0,
            no_hit: 0,
            batch_id: Some(batch_id),
            error: Some(error),
        }
    }

    /// Matched leads with retained PII that are missing at least one bureau
    /// result row, paired with the missing bureaus in eq/tu/ex order.
    async fn scan_missing(&self) -> Result<Vec<(Lead, Vec<Bureau>)>, AppError> {
        let leads = self.stores.leads.find_matched_with_pii().await?;
        if leads.is_empty() {
            return Ok(Vec::new());
        }

        let lead_ids: Vec<Uuid> = leads.iter().map(|l| l.id).collect();
        let rows = self
            .stores
            .results
            .list_for_leads(&lead_ids)
            .await
            .context("Failed to load bureau results for fill scan")?;
        let mut present: BTreeMap<Uuid, Vec<Bureau>> = BTreeMap::new();
        for row in rows {
            present.entry(row.lead_id).or_default().push(row.bureau);
        }

        let mut out = Vec::new();
        for lead in leads {
            let have = present.get(&lead.id);
            let missing: Vec<Bureau> = Bureau::ALL
                .into_iter()
                .filter(|b| !have.map(|v| v.contains(b)).unwrap_or(false))
                .collect();
            if !missing.is_empty() {
                out.push((lead, missing));
            }
        }
        Ok(out)
    }

    async fn audit_fill(&self, actor: &str, results: &BTreeMap<Bureau, BureauFillSummary>) {
        let detail: BTreeMap<&str, Value> = results
            .iter()
            .map(|(bureau, summary)| {
                (
                    bureau.as_str(),
                    json!({
                        "attempted": summary.attempted,
                        "updated": summary.updated,
                        "noHit": summary.no_hit,
                        "batchId": summary.batch_id,
                        "error": summary.error,
                    }),
                )
            })
            .collect();
        let entry = NewAuditEntry {
            action: "bureau_fill_executed".to_string(),
            actor: actor.to_string(),
            lead_id: None,
            batch_id: None,
            detail: json!(detail),
        };
        if let Err(e) = self.stores.audit.append(entry).await {
            tracing::warn!("Failed to write fill audit entry: {}", e);
        }
    }
}

/// Restricts scan candidates to the operator's selections. With no
/// selections, everything found is attempted; a selection without a bureau
/// list keeps all of that lead's missing bureaus.
fn apply_selections(
    candidates: Vec<(Lead, Vec<Bureau>)>,
    selections: Option<&[FillSelection]>,
) -> Vec<(Lead, Vec<Bureau>)> {
    let Some(selections) = selections else {
        return candidates;
    };

    candidates
        .into_iter()
        .filter_map(|(lead, missing)| {
            let selection = selections.iter().find(|s| s.lead_id == lead.id)?;
            let missing: Vec<Bureau> = match &selection.bureaus {
                Some(wanted) => missing
                    .into_iter()
                    .filter(|b| wanted.contains(b))
                    .collect(),
                None => missing,
            };
            if missing.is_empty() {
                None
            } else {
                Some((lead, missing))
            }
        })
        .collect()
}
