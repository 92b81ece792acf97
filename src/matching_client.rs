use crate::circuit_breaker::{create_matching_circuit_breaker, MatchingCircuitBreaker};
use crate::errors::AppError;
use crate::models::Bureau;
use failsafe::futures::CircuitBreaker;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Client for the bureau matching/scoring vendor API.
///
/// The base URL is injected so tests can point the client at a mock server.
/// Calls are guarded by a circuit breaker; a flapping vendor fails fast
/// instead of stacking timeouts.
#[derive(Clone)]
pub struct MatchingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    breaker: Arc<MatchingCircuitBreaker>,
}

/// One identity record formatted for submission, 1-indexed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_initial: Option<String>,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
}

/// Vendor envelope for program creation/fetch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramEnvelope {
    pub success: bool,
    /// Opaque remote program configuration; shape owned by the vendor.
    #[serde(default)]
    pub program: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A record the vendor matched and scored against at least one segment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedRecord {
    pub input_id: i64,
    /// Per-bureau raw output keyed `eq`/`tu`/`ex`. A key present with a null
    /// value means the bureau was queried and returned no data.
    #[serde(default)]
    pub outputs: BTreeMap<Bureau, Value>,
    #[serde(default)]
    pub segment_name: Option<String>,
}

/// A record the vendor could not qualify.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub input_id: i64,
    /// "matched" when the identity was found but produced no usable score.
    #[serde(rename = "match", default)]
    pub match_outcome: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl FailedRecord {
    pub fn was_matched(&self) -> bool {
        self.match_outcome.as_deref() == Some("matched")
    }
}

/// Vendor envelope for record submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecordsResponse {
    pub success: bool,
    #[serde(default)]
    pub qualified: Vec<QualifiedRecord>,
    #[serde(default)]
    pub failed: Vec<FailedRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MatchingClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create matching client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            breaker: Arc::new(create_matching_circuit_breaker()),
        })
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.breaker.call(fut).await.map_err(|e| match e {
            failsafe::Error::Inner(err) => err,
            failsafe::Error::Rejected => AppError::ExternalApiError(
                "Matching service circuit open; failing fast".to_string(),
            ),
        })
    }

    /// Creates a program on the vendor side from an opaque payload.
    pub async fn create_program(&self, payload: &Value) -> Result<ProgramEnvelope, AppError> {
        let url = format!("{}/v2/programs", self.base_url);
        tracing::info!("Creating remote matching program: {}", url);

        self.guarded(async {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .json(payload)
                .send()
                .await
                .map_err(|e| {
                    AppError::ExternalApiError(format!("Program creation request failed: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::ExternalApiError(format!(
                    "Matching API returned {}: {}",
                    status, error_text
                )));
            }

            let envelope: ProgramEnvelope = response.json().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse program response: {}", e))
            })?;

            Ok(envelope)
        })
        .await
    }

    /// Fetches the full remote configuration of an existing program.
    pub async fn get_program(&self, remote_id: &str) -> Result<ProgramEnvelope, AppError> {
        let url = format!("{}/v2/programs/{}", self.base_url, remote_id);
        tracing::info!("Fetching remote matching program {}", remote_id);

        self.guarded(async {
            let response = self
                .client
                .get(&url)
                .header("x-api-key", &self.api_key)
                .send()
                .await
                .map_err(|e| {
                    AppError::ExternalApiError(format!("Program fetch request failed: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::ExternalApiError(format!(
                    "Matching API returned {}: {}",
                    status, error_text
                )));
            }

            let envelope: ProgramEnvelope = response.json().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse program response: {}", e))
            })?;

            Ok(envelope)
        })
        .await
    }

    /// Submits a batch of identity records against a remote program.
    ///
    /// Record ids are positional (1-indexed) and owned by the caller; the
    /// vendor echoes them back as `inputId` on each qualified/failed entry.
    pub async fn submit_records(
        &self,
        remote_program_id: &str,
        records: &[MatchRecord],
    ) -> Result<SubmitRecordsResponse, AppError> {
        let url = format!("{}/v2/programs/{}/records", self.base_url, remote_program_id);
        tracing::info!(
            "Submitting {} record(s) to remote program {}",
            records.len(),
            remote_program_id
        );

        let body = serde_json::json!({ "records": records });

        self.guarded(async {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    AppError::ExternalApiError(format!("Record submission failed: {}", e))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AppError::ExternalApiError(format!(
                    "Matching API returned {}: {}",
                    status, error_text
                )));
            }

            let outcome: SubmitRecordsResponse = response.json().await.map_err(|e| {
                AppError::ExternalApiError(format!("Failed to parse submission response: {}", e))
            })?;

            tracing::info!(
                "Submission outcome: {} qualified, {} failed",
                outcome.qualified.len(),
                outcome.failed.len()
            );
            Ok(outcome)
        })
        .await
    }
}

/// Extracts an integer credit score from one bureau's raw output.
///
/// The blob is vendor-owned; scores arrive either as a bare number or under
/// a `score`/`creditScore` key of an object.
pub fn score_from_output(output: &Value) -> Option<i32> {
    if let Some(n) = output.as_i64() {
        return i32::try_from(n).ok();
    }
    output
        .get("score")
        .or_else(|| output.get("creditScore"))
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn client_creation() {
        let client = MatchingClient::new("https://example.com".to_string(), "key".to_string());
        assert!(client.is_ok());
    }

    #[test]
    fn score_extraction_variants() {
        assert_eq!(score_from_output(&json!(712)), Some(712));
        assert_eq!(score_from_output(&json!({"score": 698})), Some(698));
        assert_eq!(score_from_output(&json!({"creditScore": 655})), Some(655));
        assert_eq!(score_from_output(&json!({"thinFile": true})), None);
        assert_eq!(score_from_output(&Value::Null), None);
    }

    #[test]
    fn failed_record_match_outcome() {
        let matched: FailedRecord = serde_json::from_value(json!({
            "inputId": 2, "match": "matched", "reason": "no usable score"
        }))
        .unwrap();
        assert!(matched.was_matched());

        let no_match: FailedRecord =
            serde_json::from_value(json!({"inputId": 3, "match": "no_match"})).unwrap();
        assert!(!no_match.was_matched());
    }
}
