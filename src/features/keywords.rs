//! Keyword research feature

use crate::error::{Error, Result};
use crate::normalize;
use crate::transport::Transport;
use crate::types::{
    Keyword, KeywordCluster, KeywordReport, StatusSnapshot, TaskHandle, TaskId, TaskKind,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for a keyword research job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeywordResearchParams {
    /// Seed query to research
    pub query: String,
    /// Project to attach the job to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    /// Language code (e.g. "en")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    /// Geo target id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_target_id: Option<u64>,
    /// Cap on researched keywords
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_keywords: Option<u32>,
    /// Group results into topical clusters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_clustering: Option<bool>,
}

impl KeywordResearchParams {
    /// Parameters for a query with everything else defaulted
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            project_id: None,
            language_code: None,
            geo_target_id: None,
            max_keywords: None,
            enable_clustering: None,
        }
    }
}

/// Keyword research: `POST /api/keyword-research`, status at
/// `/{id}/status`, results at `/{id}/results`
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordResearch;

#[async_trait]
impl super::Feature for KeywordResearch {
    type Params = KeywordResearchParams;
    type Output = KeywordReport;

    fn kind(&self) -> TaskKind {
        TaskKind::KeywordResearch
    }

    async fn submit(&self, transport: &Transport, params: &Self::Params) -> Result<TaskHandle> {
        let payload = transport
            .post_raw("/api/keyword-research", Some(params))
            .await?;
        let handle: TaskHandle = serde_json::from_value(payload)?;
        tracing::info!(task_id = %handle.id, query = %params.query, "Keyword research submitted");
        Ok(handle)
    }

    async fn fetch_status(&self, transport: &Transport, id: &TaskId) -> Result<StatusSnapshot> {
        let payload = transport
            .get_raw(&format!("/api/keyword-research/{id}/status"))
            .await?;
        super::snapshot_from(payload, "keyword research status")
    }

    async fn fetch_result(
        &self,
        transport: &Transport,
        id: &TaskId,
        _terminal: &StatusSnapshot,
    ) -> Result<Self::Output> {
        let payload = transport
            .get_raw(&format!("/api/keyword-research/{id}/results"))
            .await?;
        normalize_report(id, &payload)
    }
}

/// Normalize a completed keyword research payload
///
/// Keywords may arrive as a list or keyed mapping under `keywords` or
/// `keyword_data`; clusters are optional. Entries with no keyword text are
/// dropped.
fn normalize_report(id: &TaskId, payload: &Value) -> Result<KeywordReport> {
    let items = normalize::require_collection(
        payload,
        &["keywords", "keyword_data"],
        "keyword research result",
    )?;

    let keywords = items
        .iter()
        .filter_map(|item| {
            Some(Keyword {
                keyword: item.get("keyword")?.as_str()?.to_string(),
                search_volume: normalize::optional_u64(item.get("search_volume")),
                competition: normalize::optional_f64(item.get("competition")),
                cpc: normalize::optional_f64(item.get("cpc")),
                intent: normalize::optional_str(item.get("intent")),
                cluster_id: item.get("cluster_id").and_then(Value::as_i64),
                source: normalize::optional_str(item.get("source")),
            })
        })
        .collect();

    let clusters = payload
        .get("clusters")
        .and_then(normalize::collection_values)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(KeywordCluster {
                        id: item.get("id")?.as_i64()?,
                        topic_name: item.get("topic_name")?.as_str()?.to_string(),
                        keyword_count: normalize::optional_u64(item.get("keyword_count"))
                            .unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let query = normalize::str_field(payload, &["query"]).ok_or(Error::MalformedResponse {
        context: "keyword research result: query field missing".to_string(),
    })?;

    Ok(KeywordReport {
        task_id: id.clone(),
        query,
        keywords,
        clusters,
    })
}
