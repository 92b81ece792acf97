/// Program registry: lazy cloning of the multi-bureau prescreen program into
/// single-bureau fill variants.
///
/// The local Program row is the durable cross-request cache; the moka cache
/// in front of it guarantees at most one clone creation per bureau per
/// process run.
use moka::future::Cache;
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::matching_client::MatchingClient;
use crate::models::{Bureau, FillProgramUpsert, Program};
use crate::store::{ProgramStore, Stores};

/// Vendor fields present on fetched configs but rejected on creation.
const READ_ONLY_FIELDS: &[&str] = &[
    "id",
    "programId",
    "createdAt",
    "updatedAt",
    "status",
    "recordCount",
];

/// Fields the vendor accepts as segment criteria but rejects as outputs.
const CRITERIA_ONLY_FIELDS: &[&str] = &["scoreRange", "exclusions", "suppressionFlags"];

const DEFAULT_SCORE_VERSION: &str = "standard_v3";

pub fn fill_program_name(bureau: Bureau) -> String {
    format!("Bureau Fill - {}", bureau.label())
}

pub struct FillProgramRegistry {
    stores: Stores,
    client: MatchingClient,
    cache: Cache<Bureau, Program>,
}

impl FillProgramRegistry {
    pub fn new(stores: Stores, client: MatchingClient) -> Self {
        Self {
            stores,
            client,
            // One entry per bureau; lives for the process.
            cache: Cache::builder().max_capacity(8).build(),
        }
    }

    /// Returns the single-bureau fill program for `bureau`, creating it
    /// remotely from the earliest active template if needed.
    ///
    /// `Ok(None)` means this bureau cannot be filled right now (no template,
    /// or remote creation failed); the caller records a per-bureau error and
    /// moves on rather than aborting the whole operation.
    pub async fn get_or_create(&self, bureau: Bureau) -> Result<Option<Program>, AppError> {
        if let Some(cached) = self.cache.get(&bureau).await {
            return Ok(Some(cached));
        }

        let name = fill_program_name(bureau);
        if let Some(existing) = self.stores.programs.find_active_by_name(&name).await? {
            if existing.remote_program_id.is_some() {
                self.cache.insert(bureau, existing.clone()).await;
                return Ok(Some(existing));
            }
            // Row exists from an earlier failed clone; fall through and retry.
        }

        let Some(template) = self.stores.programs.earliest_remote_template().await? else {
            tracing::warn!("No active template program with a remote id; cannot clone for {}", bureau);
            return Ok(None);
        };
        // earliest_remote_template guarantees a remote id
        let Some(template_remote_id) = template.remote_program_id.as_deref() else {
            return Ok(None);
        };

        let fetched = match self.client.get_program(template_remote_id).await {
            Ok(envelope) if envelope.success => envelope.program,
            Ok(envelope) => {
                tracing::warn!(
                    "Template config fetch rejected for {}: {}",
                    bureau,
                    envelope.error.unwrap_or_else(|| "unknown error".to_string())
                );
                None
            }
            Err(e) => {
                tracing::warn!("Template config fetch failed for {}: {}", bureau, e);
                None
            }
        };
        let Some(template_config) = fetched else {
            return Ok(None);
        };

        let payload = derive_fill_payload(&template_config, bureau, &name, &template.name);

        let (remote_id, config) = match self.client.create_program(&payload).await {
            Ok(envelope) if envelope.success => {
                let program = envelope.program.unwrap_or(Value::Null);
                let remote_id = program
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if remote_id.is_none() {
                    tracing::warn!("Fill program for {} created without an id in response", bureau);
                }
                (remote_id, program)
            }
            Ok(envelope) => {
                tracing::warn!(
                    "Fill program creation rejected for {}: {}",
                    bureau,
                    envelope.error.unwrap_or_else(|| "unknown error".to_string())
                );
                (None, payload.clone())
            }
            Err(e) => {
                tracing::warn!("Fill program creation failed for {}: {}", bureau, e);
                (None, payload.clone())
            }
        };

        let program = self
            .stores
            .programs
            .upsert_fill_program(FillProgramUpsert {
                name,
                remote_program_id: remote_id,
                config,
                bureau,
            })
            .await?;

        if program.remote_program_id.is_some() {
            self.cache.insert(bureau, program.clone()).await;
            Ok(Some(program))
        } else {
            Ok(None)
        }
    }
}

/// Derives a single-bureau fill-program creation payload from a template's
/// full remote configuration.
///
/// Same structure as the template with: read-only fields stripped, a new
/// name/description, match mode forced to single-bureau priority, only the
/// target bureau enabled (its score version copied from the template), and
/// per-segment criteria/outputs reduced to the target bureau.
pub fn derive_fill_payload(
    template: &Value,
    bureau: Bureau,
    name: &str,
    template_name: &str,
) -> Value {
    let mut payload = match template {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for field in READ_ONLY_FIELDS {
        payload.remove(*field);
    }

    payload.insert("name".to_string(), json!(name));
    payload.insert(
        "description".to_string(),
        json!(format!(
            "Single-bureau {} fill program cloned from '{}'",
            bureau.label(),
            template_name
        )),
    );
    payload.insert("matchMode".to_string(), json!("single_bureau_priority"));

    let score_version = template
        .get("bureaus")
        .and_then(|b| b.get(bureau.as_str()))
        .and_then(|b| b.get("scoreVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SCORE_VERSION)
        .to_string();

    let mut bureaus = Map::new();
    for b in Bureau::ALL {
        let entry = if b == bureau {
            json!({ "enabled": true, "scoreVersion": score_version })
        } else {
            json!({ "enabled": false })
        };
        bureaus.insert(b.as_str().to_string(), entry);
    }
    payload.insert("bureaus".to_string(), Value::Object(bureaus));

    if let Some(segments) = template.get("segments").and_then(Value::as_array) {
        let output_fields = synthesized_outputs(template);
        let reduced: Vec<Value> = segments
            .iter()
            .map(|segment| reduce_segment(segment, bureau, &output_fields))
            .collect();
        payload.insert("segments".to_string(), json!(reduced));
    }

    Value::Object(payload)
}

/// Keeps the target bureau's criteria (or a default full score range) and
/// outputs; other bureaus' criteria and outputs are dropped entirely.
fn reduce_segment(segment: &Value, bureau: Bureau, synthesized: &[String]) -> Value {
    let mut out = match segment {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let criteria = segment
        .get("criteria")
        .and_then(|c| c.get(bureau.as_str()))
        .cloned()
        .unwrap_or_else(|| json!({ "scoreRange": { "min": 300, "max": 850 } }));
    out.insert(
        "criteria".to_string(),
        json!({ bureau.as_str(): criteria }),
    );

    let existing_outputs = segment
        .get("outputs")
        .and_then(|o| o.get(bureau.as_str()))
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .cloned();
    let outputs = match existing_outputs {
        Some(fields) => fields,
        None => synthesized.iter().map(|f| json!(f)).collect(),
    };
    out.insert(
        "outputs".to_string(),
        json!({ bureau.as_str(): outputs }),
    );

    Value::Object(out)
}

/// Output list synthesized from the template's configured output fields,
/// excluding the fields the vendor rejects as outputs.
fn synthesized_outputs(template: &Value) -> Vec<String> {
    template
        .get("outputFields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .filter(|f| !CRITERIA_ONLY_FIELDS.contains(f))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
