//! AI-citation analysis feature
//!
//! The only feature with partial retry: when a subset of the analysis
//! sub-queries fails, `POST /api/citations/retry/{id}` re-queues just the
//! missing portion against the same task id, and the fresh analyses merge
//! into the retained report keyed by query text.

use crate::error::{Error, Result, SubError};
use crate::normalize;
use crate::transport::Transport;
use crate::types::{
    CitationReport, CitationScores, ProviderAnalysis, QueryAnalysis, RetryReceipt, StatusSnapshot,
    TaskHandle, TaskId, TaskKind,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for a citation analysis job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CitationParams {
    /// The URL whose AI-citation visibility is analyzed
    pub url: String,
    /// How many probe queries to run against the answer engines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_queries: Option<u32>,
}

impl CitationParams {
    /// Parameters for a URL with the default query count
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            num_queries: None,
        }
    }
}

/// Citation analysis: `POST /api/citations/analyze` (202), status at
/// `/api/citations/status/{id}`, results at `/api/citations/results/{id}`
#[derive(Clone, Copy, Debug, Default)]
pub struct CitationAnalysis;

#[async_trait]
impl super::Feature for CitationAnalysis {
    type Params = CitationParams;
    type Output = CitationReport;

    fn kind(&self) -> TaskKind {
        TaskKind::CitationAnalysis
    }

    async fn submit(&self, transport: &Transport, params: &Self::Params) -> Result<TaskHandle> {
        let payload = transport
            .post_raw("/api/citations/analyze", Some(params))
            .await?;
        let id = payload
            .get("task_id")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or(Error::MalformedResponse {
                context: "citation submit: task_id missing".to_string(),
            })?;
        let status = normalize::str_field(&payload, &["status"])
            .map(|s| crate::types::TaskStatus::parse(&s))
            .unwrap_or(crate::types::TaskStatus::Queued);
        tracing::info!(task_id = %id, url = %params.url, "Citation analysis submitted");
        Ok(TaskHandle { id, status })
    }

    async fn fetch_status(&self, transport: &Transport, id: &TaskId) -> Result<StatusSnapshot> {
        let payload = transport
            .get_raw(&format!("/api/citations/status/{id}"))
            .await?;
        super::snapshot_from(payload, "citation status")
    }

    async fn fetch_result(
        &self,
        transport: &Transport,
        id: &TaskId,
        _terminal: &StatusSnapshot,
    ) -> Result<Self::Output> {
        let payload = transport
            .get_raw(&format!("/api/citations/results/{id}"))
            .await?;
        normalize_report(id, &payload)
    }

    async fn retry(&self, transport: &Transport, id: &TaskId) -> Result<RetryReceipt> {
        let payload = transport
            .post_raw::<Value>(&format!("/api/citations/retry/{id}"), None)
            .await?;
        let receipt: RetryReceipt = serde_json::from_value(payload)?;
        tracing::info!(
            task_id = %receipt.task_id,
            missing_count = receipt.missing_count,
            "Citation retry queued for failed sub-queries"
        );
        Ok(receipt)
    }

    fn partial_failures(&self, output: &Self::Output) -> Vec<SubError> {
        output.failed_queries.clone()
    }

    fn merge_outputs(&self, previous: Option<Self::Output>, fresh: Self::Output) -> Self::Output {
        match previous {
            Some(mut report) => {
                report.merge(fresh);
                report
            }
            None => fresh,
        }
    }
}

/// Normalize a completed citation payload
///
/// Per-query entries live under `results.by_query` (or top-level
/// `by_query`), as a list or keyed mapping. Each entry carries one object
/// per provider; citation references within tolerate both the bare-string
/// and `{url, relevance}` shapes. Failed sub-queries surface either as a
/// `failed_queries` list or as an `error` on the entry itself.
fn normalize_report(id: &TaskId, payload: &Value) -> Result<CitationReport> {
    let results = payload.get("results").unwrap_or(payload);
    let entries = normalize::require_collection(results, &["by_query"], "citation result")?;

    let mut analyses = Vec::new();
    let mut failed_queries = Vec::new();

    for entry in &entries {
        let Some(query) = normalize::str_field(entry, &["query"]) else {
            continue;
        };
        if let Some(message) = normalize::str_field(entry, &["error", "error_message"]) {
            failed_queries.push(SubError { query, message });
            continue;
        }
        analyses.push(QueryAnalysis {
            providers: provider_analyses(entry),
            query,
        });
    }

    if let Some(items) = payload
        .get("failed_queries")
        .and_then(normalize::collection_values)
    {
        for item in items {
            let failure = match &item {
                Value::String(query) => Some(SubError {
                    query: query.clone(),
                    message: "sub-query failed".to_string(),
                }),
                Value::Object(_) => normalize::str_field(&item, &["query"]).map(|query| SubError {
                    query,
                    message: normalize::str_field(&item, &["message", "error"])
                        .unwrap_or_else(|| "sub-query failed".to_string()),
                }),
                _ => None,
            };
            if let Some(failure) = failure {
                if !failed_queries.iter().any(|f| f.query == failure.query) {
                    failed_queries.push(failure);
                }
            }
        }
    }

    // Scores may sit under results.scores or under meta; absent stays absent
    let scores_source = results
        .get("scores")
        .or_else(|| payload.get("meta"))
        .unwrap_or(&Value::Null);
    let scores = CitationScores {
        gpt: normalize::optional_f64(scores_source.get("gpt_score")),
        gemini: normalize::optional_f64(scores_source.get("gemini_score")),
        dataforseo: normalize::optional_f64(scores_source.get("dataforseo_score")),
    };

    let url = normalize::str_field(payload, &["url"]).ok_or(Error::MalformedResponse {
        context: "citation result: url field missing".to_string(),
    })?;

    Ok(CitationReport {
        task_id: id.clone(),
        url,
        analyses,
        scores,
        failed_queries,
    })
}

/// Extract per-provider verdicts from a by_query entry
///
/// Provider objects are recognized by a `citation_found` boolean; the
/// provider name comes from the object's own `provider` field when present
/// (DataForSEO results arrive under the `gpt` key), otherwise from the key.
fn provider_analyses(entry: &Value) -> Vec<ProviderAnalysis> {
    let Value::Object(map) = entry else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let citation_found = value.get("citation_found")?.as_bool()?;
            Some(ProviderAnalysis {
                provider: normalize::str_field(value, &["provider"])
                    .unwrap_or_else(|| key.clone()),
                citation_found,
                confidence: normalize::optional_f64(value.get("confidence")),
                references: normalize::citation_references(value.get("citation_references")),
            })
        })
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "task_id": 7,
            "url": "https://example.com",
            "status": "completed",
            "results": {
                "by_query": [
                    {
                        "query": "best example site",
                        "gpt": {
                            "citation_found": true,
                            "confidence": 0.9,
                            "citation_references": [
                                {"url": "https://example.com/about", "relevance": 0.8}
                            ]
                        },
                        "gemini": {
                            "citation_found": false,
                            "citation_references": []
                        }
                    },
                    {
                        "query": "example site reviews",
                        "gpt": {
                            "provider": "dataforseo",
                            "citation_found": true,
                            "citation_references": ["https://example.com"]
                        }
                    }
                ],
                "scores": {"gpt_score": 0.5, "gemini_score": 0.0}
            }
        })
    }

    #[test]
    fn normalizes_provider_matrix() {
        let report = normalize_report(&TaskId::Int(7), &payload()).unwrap();
        assert_eq!(report.url, "https://example.com");
        assert_eq!(report.analyses.len(), 2);

        let first = &report.analyses[0];
        assert_eq!(first.providers.len(), 2);
        let gpt = first.providers.iter().find(|p| p.provider == "gpt").unwrap();
        assert!(gpt.citation_found);
        assert_eq!(gpt.references[0].relevance, Some(0.8));
    }

    #[test]
    fn provider_field_overrides_key_name() {
        let report = normalize_report(&TaskId::Int(7), &payload()).unwrap();
        let second = &report.analyses[1];
        assert_eq!(second.providers[0].provider, "dataforseo");
        // Bare-string reference still yields a url
        assert_eq!(second.providers[0].references[0].url, "https://example.com");
        assert_eq!(second.providers[0].references[0].relevance, None);
    }

    #[test]
    fn zero_score_is_kept_absent_score_is_none() {
        let report = normalize_report(&TaskId::Int(7), &payload()).unwrap();
        assert_eq!(report.scores.gpt, Some(0.5));
        assert_eq!(report.scores.gemini, Some(0.0), "zero means zero");
        assert_eq!(report.scores.dataforseo, None, "absent means unknown");
    }

    #[test]
    fn entry_level_errors_become_failed_queries() {
        let payload = json!({
            "url": "https://example.com",
            "results": {
                "by_query": [
                    {"query": "ok one", "gpt": {"citation_found": true}},
                    {"query": "broken one", "error": "provider timeout"},
                ]
            }
        });
        let report = normalize_report(&TaskId::Int(1), &payload).unwrap();
        assert_eq!(report.analyses.len(), 1);
        assert_eq!(report.failed_queries.len(), 1);
        assert_eq!(report.failed_queries[0].query, "broken one");
    }

    #[test]
    fn failed_queries_list_tolerates_strings_and_objects() {
        let payload = json!({
            "url": "https://example.com",
            "results": {"by_query": []},
            "failed_queries": [
                "plain query",
                {"query": "structured query", "message": "engine refused"},
            ]
        });
        let report = normalize_report(&TaskId::Int(1), &payload).unwrap();
        assert_eq!(report.failed_queries.len(), 2);
        assert_eq!(report.failed_queries[1].message, "engine refused");
    }

    #[test]
    fn by_query_as_mapping_is_tolerated() {
        let payload = json!({
            "url": "https://example.com",
            "results": {
                "by_query": {
                    "q1": {"query": "alpha", "gpt": {"citation_found": false}},
                    "q2": {"query": "beta", "gpt": {"citation_found": true}},
                }
            }
        });
        let report = normalize_report(&TaskId::Int(1), &payload).unwrap();
        assert_eq!(report.analyses.len(), 2);
    }

    #[test]
    fn payload_without_by_query_is_malformed() {
        let payload = json!({"url": "https://example.com", "results": {"stuff": 1}});
        let err = normalize_report(&TaskId::Int(1), &payload).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn scores_fall_back_to_meta() {
        let payload = json!({
            "url": "https://example.com",
            "results": {"by_query": []},
            "meta": {"gpt_score": 0.7}
        });
        let report = normalize_report(&TaskId::Int(1), &payload).unwrap();
        assert_eq!(report.scores.gpt, Some(0.7));
    }
}
