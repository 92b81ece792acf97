/// Postgres implementations of the store traits.
///
/// The `prescreen.*` schema is provisioned outside this service. Enum-ish
/// columns are plain text; rows are read into private row structs and
/// converted, keeping the domain types free of database concerns.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AuditLogEntry, Batch, BatchStatus, Bureau, BureauResult, FillProgramUpsert, Lead, MatchStatus,
    NewAuditEntry, NewBatch, NewLead, Program, Tier,
};
use crate::store::{AuditStore, BatchStore, LeadStore, ProgramStore, ResultStore, Stores};

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, AppError> {
    T::from_str(raw).map_err(AppError::InternalError)
}

// ============ Row types ============

#[derive(Debug, FromRow)]
struct ProgramRow {
    id: Uuid,
    name: String,
    remote_program_id: Option<String>,
    config: Value,
    eq_enabled: bool,
    tu_enabled: bool,
    ex_enabled: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProgramRow> for Program {
    type Error = AppError;

    fn try_from(row: ProgramRow) -> Result<Self, AppError> {
        Ok(Program {
            id: row.id,
            name: row.name,
            remote_program_id: row.remote_program_id,
            config: row.config,
            eq_enabled: row.eq_enabled,
            tu_enabled: row.tu_enabled,
            ex_enabled: row.ex_enabled,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    program_id: Uuid,
    name: String,
    status: String,
    total_records: i32,
    qualified_count: i32,
    failed_count: i32,
    source_lead_ids: Vec<Uuid>,
    submitted_by: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = AppError;

    fn try_from(row: BatchRow) -> Result<Self, AppError> {
        Ok(Batch {
            id: row.id,
            program_id: row.program_id,
            name: row.name,
            status: parse_enum::<BatchStatus>(&row.status)?,
            total_records: row.total_records,
            qualified_count: row.qualified_count,
            failed_count: row.failed_count,
            source_lead_ids: row.source_lead_ids,
            submitted_by: row.submitted_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LeadRow {
    id: Uuid,
    batch_id: Uuid,
    program_id: Uuid,
    input_id: i32,
    first_name: String,
    last_name: String,
    middle_initial: Option<String>,
    address: String,
    address2: Option<String>,
    city: String,
    state: String,
    zip: String,
    ssn_encrypted: Option<String>,
    dob_encrypted: Option<String>,
    ssn_last_four: Option<String>,
    middle_score: Option<i32>,
    tier: String,
    is_qualified: bool,
    match_status: String,
    error_message: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = AppError;

    fn try_from(row: LeadRow) -> Result<Self, AppError> {
        Ok(Lead {
            id: row.id,
            batch_id: row.batch_id,
            program_id: row.program_id,
            input_id: row.input_id,
            first_name: row.first_name,
            last_name: row.last_name,
            middle_initial: row.middle_initial,
            address: row.address,
            address2: row.address2,
            city: row.city,
            state: row.state,
            zip: row.zip,
            ssn_encrypted: row.ssn_encrypted,
            dob_encrypted: row.dob_encrypted,
            ssn_last_four: row.ssn_last_four,
            middle_score: row.middle_score,
            tier: parse_enum::<Tier>(&row.tier)?,
            is_qualified: row.is_qualified,
            match_status: parse_enum::<MatchStatus>(&row.match_status)?,
            error_message: row.error_message,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ResultRow {
    id: Uuid,
    lead_id: Uuid,
    bureau: String,
    credit_score: Option<i32>,
    is_hit: bool,
    raw_output: Value,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ResultRow> for BureauResult {
    type Error = AppError;

    fn try_from(row: ResultRow) -> Result<Self, AppError> {
        Ok(BureauResult {
            id: row.id,
            lead_id: row.lead_id,
            bureau: parse_enum::<Bureau>(&row.bureau)?,
            credit_score: row.credit_score,
            is_hit: row.is_hit,
            raw_output: row.raw_output,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============ Program store ============

pub struct PgProgramStore {
    pool: PgPool,
}

impl PgProgramStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgramStore for PgProgramStore {
    async fn get(&self, id: Uuid) -> Result<Option<Program>, AppError> {
        let row = sqlx::query_as::<_, ProgramRow>(
            "SELECT * FROM prescreen.programs WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Program::try_from).transpose()
    }

    async fn find_active_by_name(&self, name: &str) -> Result<Option<Program>, AppError> {
        let row = sqlx::query_as::<_, ProgramRow>(
            "SELECT * FROM prescreen.programs WHERE name = $1 AND is_active = true LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Program::try_from).transpose()
    }

    async fn earliest_remote_template(&self) -> Result<Option<Program>, AppError> {
        let row = sqlx::query_as::<_, ProgramRow>(
            "SELECT * FROM prescreen.programs
             WHERE is_active = true AND remote_program_id IS NOT NULL
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Program::try_from).transpose()
    }

    async fn upsert_fill_program(&self, upsert: FillProgramUpsert) -> Result<Program, AppError> {
        // Find-then-update keeps the remote id writable on retry after a
        // failed clone while leaving the row's identity stable.
        let existing = sqlx::query_as::<_, ProgramRow>(
            "SELECT * FROM prescreen.programs WHERE name = $1 LIMIT 1",
        )
        .bind(&upsert.name)
        .fetch_optional(&self.pool)
        .await?;

        let row = match existing {
            Some(found) => {
                sqlx::query_as::<_, ProgramRow>(
                    "UPDATE prescreen.programs
                     SET remote_program_id = $2, config = $3, updated_at = now()
                     WHERE id = $1
                     RETURNING *",
                )
                .bind(found.id)
                .bind(&upsert.remote_program_id)
                .bind(&upsert.config)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProgramRow>(
                    "INSERT INTO prescreen.programs
                       (id, name, remote_program_id, config,
                        eq_enabled, tu_enabled, ex_enabled, is_active, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, true, now())
                     RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(&upsert.name)
                .bind(&upsert.remote_program_id)
                .bind(&upsert.config)
                .bind(upsert.bureau == Bureau::Eq)
                .bind(upsert.bureau == Bureau::Tu)
                .bind(upsert.bureau == Bureau::Ex)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Program::try_from(row)
    }
}

// ============ Batch store ============

pub struct PgBatchStore {
    pool: PgPool,
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn create(&self, batch: NewBatch) -> Result<Batch, AppError> {
        let row = sqlx::query_as::<_, BatchRow>(
            "INSERT INTO prescreen.batches
               (id, program_id, name, status, total_records,
                qualified_count, failed_count, source_lead_ids, submitted_by, created_at)
             VALUES ($1, $2, $3, $4, $5, 0, 0, $6, $7, now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(batch.program_id)
        .bind(&batch.name)
        .bind(batch.status.as_str())
        .bind(batch.total_records)
        .bind(&batch.source_lead_ids)
        .bind(&batch.submitted_by)
        .fetch_one(&self.pool)
        .await?;

        Batch::try_from(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Batch>, AppError> {
        let row =
            sqlx::query_as::<_, BatchRow>("SELECT * FROM prescreen.batches WHERE id = $1 LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Batch::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: BatchStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE prescreen.batches SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_counts(
        &self,
        id: Uuid,
        qualified_count: i32,
        failed_count: i32,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE prescreen.batches
             SET qualified_count = $2, failed_count = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(qualified_count)
        .bind(failed_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zero_counts(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE prescreen.batches
             SET total_records = 0, qualified_count = 0, failed_count = 0, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============ Lead store ============

pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn create(&self, lead: NewLead) -> Result<Lead, AppError> {
        let row = sqlx::query_as::<_, LeadRow>(
            "INSERT INTO prescreen.leads
               (id, batch_id, program_id, input_id,
                first_name, last_name, middle_initial,
                address, address2, city, state, zip,
                ssn_encrypted, dob_encrypted, ssn_last_four,
                middle_score, tier, is_qualified, match_status, error_message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                     $13, $14, $15, $16, $17, $18, $19, $20, now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(lead.batch_id)
        .bind(lead.program_id)
        .bind(lead.input_id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.middle_initial)
        .bind(&lead.address)
        .bind(&lead.address2)
        .bind(&lead.city)
        .bind(&lead.state)
        .bind(&lead.zip)
        .bind(&lead.ssn_encrypted)
        .bind(&lead.dob_encrypted)
        .bind(&lead.ssn_last_four)
        .bind(lead.middle_score)
        .bind(lead.tier.as_str())
        .bind(lead.is_qualified)
        .bind(lead.match_status.as_str())
        .bind(&lead.error_message)
        .fetch_one(&self.pool)
        .await?;

        Lead::try_from(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let row =
            sqlx::query_as::<_, LeadRow>("SELECT * FROM prescreen.leads WHERE id = $1 LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Lead::try_from).transpose()
    }

    async fn exists_scored_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (
               SELECT 1 FROM prescreen.leads
               WHERE program_id = $1
                 AND LOWER(first_name) = LOWER($2)
                 AND LOWER(last_name) = LOWER($3)
                 AND (middle_score IS NOT NULL OR tier <> 'pending')
             )",
        )
        .bind(program_id)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn find_stale_by_identity(
        &self,
        program_id: Uuid,
        first_name: &str,
        last_name: &str,
        exclude_batch: Uuid,
    ) -> Result<Vec<Lead>, AppError> {
        let rows = sqlx::query_as::<_, LeadRow>(
            "SELECT * FROM prescreen.leads
             WHERE program_id = $1
               AND batch_id <> $4
               AND LOWER(first_name) = LOWER($2)
               AND LOWER(last_name) = LOWER($3)
               AND match_status IN ('pending', 'api_error')",
        )
        .bind(program_id)
        .bind(first_name)
        .bind(last_name)
        .bind(exclude_batch)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lead::try_from).collect()
    }

    async fn find_matched_with_pii(&self) -> Result<Vec<Lead>, AppError> {
        let rows = sqlx::query_as::<_, LeadRow>(
            "SELECT * FROM prescreen.leads
             WHERE match_status = 'matched'
               AND ssn_encrypted IS NOT NULL
               AND dob_encrypted IS NOT NULL
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lead::try_from).collect()
    }

    async fn update_scores(
        &self,
        id: Uuid,
        middle_score: Option<i32>,
        tier: Tier,
        is_qualified: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE prescreen.leads
             SET middle_score = $2, tier = $3, is_qualified = $4, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(middle_score)
        .bind(tier.as_str())
        .bind(is_qualified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM prescreen.leads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_for_batch(&self, batch_id: Uuid) -> Result<i64, AppError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM prescreen.leads WHERE batch_id = $1")
                .bind(batch_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}

// ============ Result store ============

pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert(
        &self,
        lead_id: Uuid,
        bureau: Bureau,
        credit_score: Option<i32>,
        is_hit: bool,
        raw_output: Value,
    ) -> Result<BureauResult, AppError> {
        let existing = sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM prescreen.bureau_results WHERE lead_id = $1 AND bureau = $2 LIMIT 1",
        )
        .bind(lead_id)
        .bind(bureau.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match existing {
            Some(found) => {
                sqlx::query_as::<_, ResultRow>(
                    "UPDATE prescreen.bureau_results
                     SET credit_score = $2, is_hit = $3, raw_output = $4, updated_at = now()
                     WHERE id = $1
                     RETURNING *",
                )
                .bind(found.id)
                .bind(credit_score)
                .bind(is_hit)
                .bind(&raw_output)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ResultRow>(
                    "INSERT INTO prescreen.bureau_results
                       (id, lead_id, bureau, credit_score, is_hit, raw_output, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, now())
                     RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(lead_id)
                .bind(bureau.as_str())
                .bind(credit_score)
                .bind(is_hit)
                .bind(&raw_output)
                .fetch_one(&self.pool)
                .await?
            }
        };

        BureauResult::try_from(row)
    }

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<BureauResult>, AppError> {
        let rows = sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM prescreen.bureau_results WHERE lead_id = $1 ORDER BY bureau ASC",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BureauResult::try_from).collect()
    }

    async fn list_for_leads(&self, lead_ids: &[Uuid]) -> Result<Vec<BureauResult>, AppError> {
        let rows = sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM prescreen.bureau_results WHERE lead_id = ANY($1)",
        )
        .bind(lead_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BureauResult::try_from).collect()
    }

    async fn delete_for_lead(&self, lead_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM prescreen.bureau_results WHERE lead_id = $1")
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ Audit store ============

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditLogEntry, AppError> {
        let id = Uuid::new_v4();
        let created_at: (DateTime<Utc>,) = sqlx::query_as(
            "INSERT INTO prescreen.audit_log
               (id, action, actor, lead_id, batch_id, detail, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             RETURNING created_at",
        )
        .bind(id)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(entry.lead_id)
        .bind(entry.batch_id)
        .bind(&entry.detail)
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditLogEntry {
            id,
            action: entry.action,
            actor: entry.actor,
            lead_id: entry.lead_id,
            batch_id: entry.batch_id,
            detail: entry.detail,
            created_at: created_at.0,
        })
    }
}

/// Builds the full Postgres-backed store bundle from one pool.
pub fn pg_stores(pool: PgPool) -> Stores {
    Stores {
        programs: std::sync::Arc::new(PgProgramStore::new(pool.clone())),
        batches: std::sync::Arc::new(PgBatchStore::new(pool.clone())),
        leads: std::sync::Arc::new(PgLeadStore::new(pool.clone())),
        results: std::sync::Arc::new(PgResultStore::new(pool.clone())),
        audit: std::sync::Arc::new(PgAuditStore::new(pool)),
    }
}
