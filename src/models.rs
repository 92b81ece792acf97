use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Domain Enums ============

/// One of the three US credit reporting agencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bureau {
    /// Equifax
    Eq,
    /// TransUnion
    Tu,
    /// Experian
    Ex,
}

impl Bureau {
    pub const ALL: [Bureau; 3] = [Bureau::Eq, Bureau::Tu, Bureau::Ex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bureau::Eq => "eq",
            Bureau::Tu => "tu",
            Bureau::Ex => "ex",
        }
    }

    /// Uppercase label used in fill-program names and operator-facing text.
    pub fn label(&self) -> &'static str {
        match self {
            Bureau::Eq => "EQ",
            Bureau::Tu => "TU",
            Bureau::Ex => "EX",
        }
    }
}

impl fmt::Display for Bureau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bureau {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Bureau::Eq),
            "tu" => Ok(Bureau::Tu),
            "ex" => Ok(Bureau::Ex),
            other => Err(format!("unknown bureau: {}", other)),
        }
    }
}

/// Qualification bucket derived from score thresholds.
///
/// Never set directly by callers; always recomputed by the scoring engine
/// from the current set of bureau results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Below,
    /// Awaiting manual processing (program without a remote id).
    Pending,
    /// Queried but produced no usable score, or confirmed no-match.
    Filtered,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier_1",
            Tier::Tier2 => "tier_2",
            Tier::Tier3 => "tier_3",
            Tier::Below => "below",
            Tier::Pending => "pending",
            Tier::Filtered => "filtered",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier_1" => Ok(Tier::Tier1),
            "tier_2" => Ok(Tier::Tier2),
            "tier_3" => Ok(Tier::Tier3),
            "below" => Ok(Tier::Below),
            "pending" => Ok(Tier::Pending),
            "filtered" => Ok(Tier::Filtered),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Outcome of the vendor match for a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Matched,
    NoMatch,
    ApiError,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Matched => "matched",
            MatchStatus::NoMatch => "no_match",
            MatchStatus::ApiError => "api_error",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "matched" => Ok(MatchStatus::Matched),
            "no_match" => Ok(MatchStatus::NoMatch),
            "api_error" => Ok(MatchStatus::ApiError),
            other => Err(format!("unknown match status: {}", other)),
        }
    }
}

/// Lifecycle state of a submission or fill batch.
///
/// A batch transitions once; resubmission creates a new batch rather than
/// mutating an old one (outside count reconciliation by stale cleanup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "partial" => Ok(BatchStatus::Partial),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

// ============ Database Models ============

/// A prescreen program definition.
///
/// Once `remote_program_id` is set it is immutable identity for this
/// program on the vendor side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: Uuid,
    pub name: String,
    /// Vendor-side program id; null until successfully created upstream.
    pub remote_program_id: Option<String>,
    /// Opaque vendor configuration blob, passed through unmodified.
    pub config: Value,
    pub eq_enabled: bool,
    pub tu_enabled: bool,
    pub ex_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Program {
    pub fn bureau_enabled(&self, bureau: Bureau) -> bool {
        match bureau {
            Bureau::Eq => self.eq_enabled,
            Bureau::Tu => self.tu_enabled,
            Bureau::Ex => self.ex_enabled,
        }
    }
}

/// One submission or fill run against a program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    pub status: BatchStatus,
    pub total_records: i32,
    pub qualified_count: i32,
    pub failed_count: i32,
    /// For fill batches: the leads whose bureaus were re-queried.
    pub source_lead_ids: Vec<Uuid>,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A screened consumer identity.
///
/// SSN/DOB are stored only in encrypted form; `ssn_last_four` exists for
/// display. `tier` and `middle_score` are derived by the scoring engine from
/// the lead's bureau results, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub program_id: Uuid,
    /// 1-indexed positional id within the submission payload.
    pub input_id: i32,
    pub first_name: String,
    pub last_name: String,
    pub middle_initial: Option<String>,
    pub address: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub ssn_encrypted: Option<String>,
    pub dob_encrypted: Option<String>,
    pub ssn_last_four: Option<String>,
    pub middle_score: Option<i32>,
    pub tier: Tier,
    pub is_qualified: bool,
    pub match_status: MatchStatus,
    pub error_message: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One bureau outcome for a lead. Unique on (lead, bureau).
///
/// A row with `is_hit = false` means the bureau was queried and confirmed no
/// data, which is distinct from "never queried" (no row at all).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BureauResult {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub bureau: Bureau,
    pub credit_score: Option<i32>,
    pub is_hit: bool,
    /// Opaque raw vendor output for this bureau.
    pub raw_output: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Append-only audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub actor: String,
    pub lead_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

// ============ Store Inputs ============

/// Fields for creating a batch row.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub program_id: Uuid,
    pub name: String,
    pub status: BatchStatus,
    pub total_records: i32,
    pub source_lead_ids: Vec<Uuid>,
    pub submitted_by: String,
}

/// Fields for creating a lead row.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub batch_id: Uuid,
    pub program_id: Uuid,
    pub input_id: i32,
    pub first_name: String,
    pub last_name: String,
    pub middle_initial: Option<String>,
    pub address: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub ssn_encrypted: Option<String>,
    pub dob_encrypted: Option<String>,
    pub ssn_last_four: Option<String>,
    pub middle_score: Option<i32>,
    pub tier: Tier,
    pub is_qualified: bool,
    pub match_status: MatchStatus,
    pub error_message: Option<String>,
}

/// Fields for creating or updating a fill program row, keyed by name.
#[derive(Debug, Clone)]
pub struct FillProgramUpsert {
    pub name: String,
    pub remote_program_id: Option<String>,
    pub config: Value,
    pub bureau: Bureau,
}

/// Fields for an audit entry.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: String,
    pub actor: String,
    pub lead_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub detail: Value,
}

// ============ API Request/Response Models ============

/// One identity record in a submission request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_initial: Option<String>,
    pub address: String,
    #[serde(default)]
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    #[serde(default)]
    pub ssn: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
}

/// Request payload for POST /api/v1/prescreen/batches.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    pub program_id: Uuid,
    #[serde(default)]
    pub batch_name: Option<String>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    pub records: Vec<RecordInput>,
}

/// A record skipped by pre-submission dedup, with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    /// 1-indexed position of the record in the original request.
    pub input_id: i32,
    pub name: String,
    pub reason: String,
}

/// Response payload for a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    pub batch_id: Option<Uuid>,
    pub total_submitted: i32,
    pub qualified_count: i32,
    pub failed_count: i32,
    pub skipped: Vec<SkippedRecord>,
    pub status: BatchStatus,
}

/// Summary block of the fill preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPreviewSummary {
    pub total_leads_with_missing: usize,
    pub missing_eq: usize,
    pub missing_tu: usize,
    pub missing_ex: usize,
}

/// One lead in the fill preview list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPreviewLead {
    pub lead_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub ssn_last_four: Option<String>,
    pub tier: Tier,
    pub missing_bureaus: Vec<Bureau>,
}

/// Response payload for GET /api/v1/bureau-fill/preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPreviewResponse {
    pub summary: FillPreviewSummary,
    pub leads: Vec<FillPreviewLead>,
}

/// Per-lead restriction for fill execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSelection {
    pub lead_id: Uuid,
    /// If absent, every missing bureau for this lead is attempted.
    #[serde(default)]
    pub bureaus: Option<Vec<Bureau>>,
}

/// Request payload for POST /api/v1/bureau-fill/execute.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillExecuteRequest {
    /// If absent, everything the scan found is attempted.
    #[serde(default)]
    pub selections: Option<Vec<FillSelection>>,
    #[serde(default)]
    pub executed_by: Option<String>,
}

/// Outcome of one bureau's fill pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BureauFillSummary {
    pub attempted: usize,
    /// Leads whose score/tier were recomputed from a fresh hit.
    pub updated: usize,
    /// Leads recorded as checked with no bureau data.
    pub no_hit: usize,
    pub batch_id: Option<Uuid>,
    pub error: Option<String>,
}

impl BureauFillSummary {
    pub fn empty() -> Self {
        Self {
            attempted: 0,
            updated: 0,
            no_hit: 0,
            batch_id: None,
            error: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            attempted: 0,
            updated: 0,
            no_hit: 0,
            batch_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Response payload for POST /api/v1/bureau-fill/execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillExecuteResponse {
    pub results: BTreeMap<Bureau, BureauFillSummary>,
    pub total_updated: usize,
}

/// Response payload for GET /api/v1/batches/:id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetailResponse {
    pub batch: Batch,
    pub lead_count: i64,
}
