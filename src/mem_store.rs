/// In-memory store implementations.
///
/// Back the orchestrator integration tests and local development; behavior
/// mirrors the Postgres implementations, including upsert-by-compound-key
/// semantics on bureau results.
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AuditLogEntry, Batch, BatchStatus, Bureau, BureauResult, FillProgramUpsert, Lead, NewAuditEntry,
    NewBatch, NewLead, Program, Tier,
};
use crate::store::{AuditStore, BatchStore, LeadStore, ProgramStore, ResultStore, Stores};

#[derive(Default)]
pub struct MemProgramStore {
    programs: Mutex<Vec<Program>>,
}

impl MemProgramStore {
    pub fn insert(&self, program: Program) {
        self.programs.lock().unwrap().push(program);
    }
}

#[async_trait]
impl ProgramStore for MemProgramStore {
    async fn get(&self, id: Uuid) -> Result<Option<Program>, AppError> {
        Ok(self
            .programs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_active_by_name(&self, name: &str) -> Result<Option<Program>, AppError> {
        Ok(self
            .programs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.is_active && p.name == name)
            .cloned())
    }

    async fn earliest_remote_template(&self) -> Result<Option<Program>, AppError> {
        Ok(self
            .programs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active && p.remote_program_id.is_some())
            .min_by_key(|p| p.created_at)
            .cloned())
    }

    async fn upsert_fill_program(&self, upsert: FillProgramUpsert) -> Result<Program, AppError> {
        let mut programs = self.programs.lock().unwrap();
        if let Some(existing) = programs.iter_mut().find(|p| p.name == upsert.name) {
            existing.remote_program_id = upsert.remote_program_id;
            existing.config = upsert.config;
            existing.updated_at = Some(Utc::now());
            return Ok(existing.clone());
        }

        let program = Program {
            id: Uuid::new_v4(),
            name: upsert.name,
            remote_program_id: upsert.remote_program_id,
            config: upsert.config,
            eq_enabled: upsert.bureau == Bureau::Eq,
            tu_enabled: upsert.bureau == Bureau::Tu,
            ex_enabled: upsert.bureau == Bureau::Ex,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        programs.push(program.clone());
        Ok(program)
    }
}

#[derive(Default)]
pub struct MemBatchStore {
    batches: Mutex<HashMap<Uuid, Batch>>,
}

impl MemBatchStore {
    pub fn insert(&self, batch: Batch) {
        self.batches.lock().unwrap().insert(batch.id, batch);
    }
}

#[async_trait]
impl BatchStore for MemBatchStore {
    async fn create(&self, batch: NewBatch) -> Result<Batch, AppError> {
        let row = Batch {
            id: Uuid::new_v4(),
            program_id: batch.program_id,
            name: batch.name,
            status: batch.status,
            total_records: batch.total_records,
            qualified_count: 0,
            failed_count: 0,
            source_lead_ids: batch.source_lead_ids,
            submitted_by: batch.submitted_by,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.batches.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Batch>, AppError> {
        Ok(self.batches.lock().unwrap().get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: BatchStatus) -> Result<(), AppError> {
        if let Some(batch) = self.batches.lock().unwrap().get_mut(&id) {
            batch.status = status;
            batch.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_counts(
        &self,
        id: Uuid,
        qualified_count: i32,
        failed_count: i32,
    ) -> Result<(), AppError> {
        if let Some(batch) = self.batches.lock().unwrap().get_mut(&id) {
            batch.qualified_count = qualified_count;
            batch.failed_count = failed_count;
            batch.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn zero_counts(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(batch) = self.batches.lock().unwrap().get_mut(&id) {
            batch.total_records = 0;
            batch.qualified_count = 0;
            batch.failed_count = 0;
            batch.updated_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemLeadStore {
    leads: Mutex<HashMap<Uuid, Lead>>,
}

impl MemLeadStore {
    pub fn insert(&self, lead: Lead) {
        self.leads.lock().unwrap().insert(lead.id, lead);
    }

    pub fn all(&self) -> Vec<Lead> {
        self.leads.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl LeadStore for MemLeadStore {
    async fn create(&self, lead: NewLead) -> Result<Lead, AppError> {
        let row = Lead {
            id: Uuid::new_v4(),
            batch_id: lead.batch_id,
            program_id: lead.program_id,
            input_id: lead.input_id,
            first_name: lead.first_name,
            last_name: lead.last_name,
            middle_initial: lead.middle_initial,
            address: lead.address,
            address2: lead.address2,
            city: lead.city,
            state: lead.state,
            zip: lead.zip,
            ssn_encrypted: lead.ssn_encrypted,
            dob_encrypted: lead.dob_encrypted,
            ssn_last_four: lead.ssn_last_four,
            middle_score: lead.middle_score,
            tier: lead.tier,
            is_qualified: lead.is_qualified,
            match_status: lead.match_status,
            error_message: lead.error_message,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.leads.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        Ok(self.leads.lock().unwrap().get(&id).cloned())
    }

    async fn exists_scored_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<bool, AppError> {
        let first = first_name.to_lowercase();
        let last = last_name.to_lowercase();
        Ok(self.leads.lock().unwrap().values().any(|l| {
            l.program_id == program_id
                && l.first_name.to_lowercase() == first
                && l.last_name.to_lowercase() == last
                && (l.middle_score.is_some() || l.tier != Tier::Pending)
        }))
    }

    async fn find_stale_by_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
        exclude_batch: Uuid,
    ) -> Result<Vec<Lead>, AppError> {
        let first = first_name.to_lowercase();
        let last = last_name.to_lowercase();
        Ok(self
            .leads
            .lock()
            .unwrap()
            .values()
            .filter(|l| {
                l.program_id == program_id
                    && l.batch_id != exclude_batch
                    && l.first_name.to_lowercase() == first
                    && l.last_name.to_lowercase() == last
                    && matches!(
                        l.match_status,
                        crate::models::MatchStatus::Pending | crate::models::MatchStatus::ApiError
                    )
            })
            .cloned()
            .collect())
    }

    async fn find_matched_with_pii(&self) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .leads
            .lock()
            .unwrap()
            .values()
            .filter(|l| {
                l.match_status == crate::models::MatchStatus::Matched
                    && l.ssn_encrypted.is_some()
                    && l.dob_encrypted.is_some()
            })
            .cloned()
            .collect();
        leads.sort_by_key(|l| l.created_at);
        Ok(leads)
    }

    async fn update_scores(
        &self,
        id: Uuid,
        middle_score: Option<i32>,
        tier: Tier,
        is_qualified: bool,
    ) -> Result<(), AppError> {
        if let Some(lead) = self.leads.lock().unwrap().get_mut(&id) {
            lead.middle_score = middle_score;
            lead.tier = tier;
            lead.is_qualified = is_qualified;
            lead.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.leads.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn count_for_batch(&self, batch_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .leads
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.batch_id == batch_id)
            .count() as i64)
    }
}

#[derive(Default)]
pub struct MemResultStore {
    results: Mutex<HashMap<(Uuid, Bureau), BureauResult>>,
}

impl MemResultStore {
    pub fn all(&self) -> Vec<BureauResult> {
        self.results.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ResultStore for MemResultStore {
    async fn upsert(
        &self,
        lead_id: Uuid,
        bureau: Bureau,
        credit_score: Option<i32>,
        is_hit: bool,
        raw_output: serde_json::Value,
    ) -> Result<BureauResult, AppError> {
        let mut results = self.results.lock().unwrap();
        let row = match results.get(&(lead_id, bureau)) {
            Some(existing) => BureauResult {
                credit_score,
                is_hit,
                raw_output,
                updated_at: Some(Utc::now()),
                ..existing.clone()
            },
            None => BureauResult {
                id: Uuid::new_v4(),
                lead_id,
                bureau,
                credit_score,
                is_hit,
                raw_output,
                created_at: Utc::now(),
                updated_at: None,
            },
        };
        results.insert((lead_id, bureau), row.clone());
        Ok(row)
    }

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<BureauResult>, AppError> {
        let mut rows: Vec<BureauResult> = self
            .results
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.lead_id == lead_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.bureau);
        Ok(rows)
    }

    async fn list_for_leads(&self, lead_ids: &[Uuid]) -> Result<Vec<BureauResult>, AppError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .values()
            .filter(|r| lead_ids.contains(&r.lead_id))
            .cloned()
            .collect())
    }

    async fn delete_for_lead(&self, lead_id: Uuid) -> Result<(), AppError> {
        self.results
            .lock()
            .unwrap()
            .retain(|(lid, _), _| *lid != lead_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemAuditStore {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemAuditStore {
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for MemAuditStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, AppError> {
        let row = AuditLogEntry {
            id: Uuid::new_v4(),
            action: entry.action,
            actor: entry.actor,
            lead_id: entry.lead_id,
            batch_id: entry.batch_id,
            detail: entry.detail,
            created_at: Utc::now(),
        };
        self.entries.lock().unwrap().push(row.clone());
        Ok(row)
    }
}

/// Concrete in-memory bundle; keeps typed handles for seeding and
/// inspection alongside the trait-object `Stores` view.
#[derive(Clone)]
pub struct MemStores {
    pub programs: Arc<MemProgramStore>,
    pub batches: Arc<MemBatchStore>,
    pub leads: Arc<MemLeadStore>,
    pub results: Arc<MemResultStore>,
    pub audit: Arc<MemAuditStore>,
}

impl MemStores {
    pub fn new() -> Self {
        Self {
            programs: Arc::new(MemProgramStore::default()),
            batches: Arc::new(MemBatchStore::default()),
            leads: Arc::new(MemLeadStore::default()),
            results: Arc::new(MemResultStore::default()),
            audit: Arc::new(MemAuditStore::default()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            programs: self.programs.clone(),
            batches: self.batches.clone(),
            leads: self.leads.clone(),
            results: self.results.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl Default for MemStores {
    fn default() -> Self {
        Self::new()
    }
}
