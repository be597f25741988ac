//! Backlink/PBN analysis feature
//!
//! Backlink jobs crawl third-party indexes and run noticeably longer than
//! the other features, so their default poll tuning is slower (5s interval,
//! 120 attempts). Status and results are fetched via POST with a `task_id`
//! body rather than path parameters.

use crate::error::{Error, Result};
use crate::normalize;
use crate::transport::Transport;
use crate::types::{
    Backlink, BacklinkReport, BacklinkSummary, PbnDetection, RiskLevel, StatusSnapshot,
    TaskHandle, TaskId, TaskKind, TaskStatus,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Parameters for a backlink analysis job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BacklinkParams {
    /// The domain whose backlink profile is analyzed
    pub domain: String,
    /// Cap on backlinks fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl BacklinkParams {
    /// Parameters for a domain with the default limit
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            limit: None,
        }
    }
}

/// Backlink analysis: `POST /api/seo/backlinks/submit`, with status and
/// results POSTed against `{task_id}`
#[derive(Clone, Copy, Debug, Default)]
pub struct BacklinkAnalysis;

#[async_trait]
impl super::Feature for BacklinkAnalysis {
    type Params = BacklinkParams;
    type Output = BacklinkReport;

    fn kind(&self) -> TaskKind {
        TaskKind::BacklinkAnalysis
    }

    async fn submit(&self, transport: &Transport, params: &Self::Params) -> Result<TaskHandle> {
        let payload = transport
            .post_raw("/api/seo/backlinks/submit", Some(params))
            .await?;
        let id: TaskId = payload
            .get("task_id")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or(Error::MalformedResponse {
                context: "backlink submit: task_id missing".to_string(),
            })?;
        let status = normalize::str_field(&payload, &["status"])
            .map(|s| TaskStatus::parse(&s))
            .unwrap_or(TaskStatus::Pending);
        tracing::info!(task_id = %id, domain = %params.domain, "Backlink analysis submitted");
        Ok(TaskHandle { id, status })
    }

    async fn fetch_status(&self, transport: &Transport, id: &TaskId) -> Result<StatusSnapshot> {
        let payload = transport
            .post_raw("/api/seo/backlinks/status", Some(&json!({"task_id": id})))
            .await?;
        super::snapshot_from(payload, "backlink status")
    }

    async fn fetch_result(
        &self,
        transport: &Transport,
        id: &TaskId,
        _terminal: &StatusSnapshot,
    ) -> Result<Self::Output> {
        let payload = transport
            .post_raw("/api/seo/backlinks/results", Some(&json!({"task_id": id})))
            .await?;
        normalize_report(id, &payload)
    }
}

/// Normalize a completed backlink payload
///
/// The backlink collection sits under `results.backlinks` or top-level
/// `backlinks`, as a list or keyed mapping. Summary and PBN counts are
/// optional and default to zeroed aggregates; individual links missing their
/// risk classification keep it `None`.
fn normalize_report(id: &TaskId, payload: &Value) -> Result<BacklinkReport> {
    let results = payload.get("results").unwrap_or(payload);
    let items = normalize::require_collection(results, &["backlinks"], "backlink result")?;

    let backlinks = items
        .iter()
        .filter_map(|item| {
            Some(Backlink {
                source_url: item.get("source_url")?.as_str()?.to_string(),
                domain_from: normalize::str_field(item, &["domain_from", "domain"])
                    .unwrap_or_default(),
                anchor: normalize::str_field(item, &["anchor"]).unwrap_or_default(),
                link_type: normalize::str_field(item, &["link_type"]).unwrap_or_default(),
                domain_rank: normalize::optional_u64(item.get("domain_rank"))
                    .and_then(|r| u32::try_from(r).ok()),
                pbn_probability: normalize::optional_f64(item.get("pbn_probability")),
                risk_level: item
                    .get("risk_level")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<RiskLevel>(v).ok()),
            })
        })
        .collect();

    let summary: BacklinkSummary = results
        .get("summary")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let pbn_detection: PbnDetection = results
        .get("pbn_detection")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let domain = normalize::str_field(payload, &["domain"])
        .or_else(|| normalize::str_field(results, &["domain"]))
        .unwrap_or_default();
    let completed_at = normalize::str_field(payload, &["completed_at"])
        .and_then(|s| s.parse().ok());

    Ok(BacklinkReport {
        task_id: id.clone(),
        domain,
        backlinks,
        summary,
        pbn_detection,
        completed_at,
    })
}
