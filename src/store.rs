/// Repository interfaces for persisted state.
///
/// Each entity gets its own store trait so orchestrators depend on narrow
/// seams instead of an ambient database pool; `pg_store` provides the
/// Postgres implementations and `mem_store` the in-memory ones used by
/// tests and local development.
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AuditLogEntry, Batch, BatchStatus, Bureau, BureauResult, FillProgramUpsert, Lead, NewAuditEntry,
    NewBatch, NewLead, Program, Tier,
};

#[async_trait]
pub trait ProgramStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Program>, AppError>;

    /// Active program with this exact name, if any.
    async fn find_active_by_name(&self, name: &str) -> Result<Option<Program>, AppError>;

    /// Earliest-created active program that already has a remote id; the
    /// template for fill-program cloning.
    async fn earliest_remote_template(&self) -> Result<Option<Program>, AppError>;

    /// Create-or-update keyed by name. Used to persist fill programs with
    /// whatever remote id resulted, null included.
    async fn upsert_fill_program(&self, upsert: FillProgramUpsert) -> Result<Program, AppError>;
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn create(&self, batch: NewBatch) -> Result<Batch, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Batch>, AppError>;

    async fn update_status(&self, id: Uuid, status: BatchStatus) -> Result<(), AppError>;

    async fn update_counts(
        &self,
        id: Uuid,
        qualified_count: i32,
        failed_count: i32,
    ) -> Result<(), AppError>;

    /// Zeroes all counts on a batch emptied by stale-lead cleanup.
    async fn zero_counts(&self, id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn create(&self, lead: NewLead) -> Result<Lead, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError>;

    /// Whether a lead with this case-insensitive first+last name and a
    /// non-null score or qualifying tier already exists in the program.
    /// Drives pre-submission dedup.
    async fn exists_scored_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<bool, AppError>;

    /// Leads in other batches of the program sharing this identity's name
    /// that are stuck in `pending`/`api_error`. Targets of stale cleanup.
    async fn find_stale_by_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
        exclude_batch: Uuid,
    ) -> Result<Vec<Lead>, AppError>;

    /// Leads eligible for bureau fill: matched, with both encrypted PII
    /// fields retained.
    async fn find_matched_with_pii(&self) -> Result<Vec<Lead>, AppError>;

    async fn update_scores(
        &self,
        id: Uuid,
        middle_score: Option<i32>,
        tier: Tier,
        is_qualified: bool,
    ) -> Result<(), AppError>;

    async fn delete(&self, id: Uuid) -> Result<(), AppError>;

    async fn count_for_batch(&self, batch_id: Uuid) -> Result<i64, AppError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create-or-overwrite keyed by (lead, bureau). Repeated fills are
    /// idempotent overwrites, never duplicates.
    async fn upsert(
        &self,
        lead_id: Uuid,
        bureau: Bureau,
        credit_score: Option<i32>,
        is_hit: bool,
        raw_output: serde_json::Value,
    ) -> Result<BureauResult, AppError>;

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<BureauResult>, AppError>;

    async fn list_for_leads(&self, lead_ids: &[Uuid]) -> Result<Vec<BureauResult>, AppError>;

    async fn delete_for_lead(&self, lead_id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, AppError>;
}

/// Bundle of all stores, injected into orchestrators and handlers.
#[derive(Clone)]
pub struct Stores {
    pub programs: Arc<dyn ProgramStore>,
    pub batches: Arc<dyn BatchStore>,
    pub leads: Arc<dyn LeadStore>,
    pub results: Arc<dyn ResultStore>,
    pub audit: Arc<dyn AuditStore>,
}
