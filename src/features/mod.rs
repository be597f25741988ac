//! Per-feature task submitters, status fetchers, and result normalizers
//!
//! The four analysis features share one polling and lifecycle engine; what
//! varies per feature — endpoints, request bodies, status payload field
//! names, result shapes, poll tuning — is expressed through the [`Feature`]
//! trait implemented by one type per module:
//! - [`keywords`] - keyword research
//! - [`citations`] - AI-citation analysis (the only feature with partial retry)
//! - [`backlinks`] - backlink/PBN analysis
//! - [`faq`] - FAQ generation

pub mod backlinks;
pub mod citations;
pub mod faq;
pub mod keywords;

pub use backlinks::BacklinkAnalysis;
pub use citations::CitationAnalysis;
pub use faq::FaqGeneration;
pub use keywords::KeywordResearch;

use crate::error::{Error, Result, SubError};
use crate::transport::Transport;
use crate::types::{Progress, RetryReceipt, StatusSnapshot, TaskHandle, TaskId, TaskKind, TaskStatus};
use async_trait::async_trait;
use serde_json::Value;

/// One long-running analysis feature
///
/// `submit` performs exactly one request and never retries; submission
/// failures surface immediately to the caller, who decides whether to
/// resubmit. `fetch_result` receives the terminal snapshot so features whose
/// results are embedded in the status response can normalize without a
/// second fetch.
#[async_trait]
pub trait Feature: Send + Sync + 'static {
    /// Feature-specific submission parameters (validated by the caller)
    type Params: Send + Sync;
    /// The feature's canonical normalized result
    type Output: Clone + Send;

    /// Which task kind this feature produces
    fn kind(&self) -> TaskKind;

    /// Start a unit of remote work; returns the assigned id and initial status
    async fn submit(&self, transport: &Transport, params: &Self::Params) -> Result<TaskHandle>;

    /// Fetch one status snapshot for a task
    async fn fetch_status(&self, transport: &Transport, id: &TaskId) -> Result<StatusSnapshot>;

    /// Fetch and normalize the completed result
    async fn fetch_result(
        &self,
        transport: &Transport,
        id: &TaskId,
        terminal: &StatusSnapshot,
    ) -> Result<Self::Output>;

    /// Re-queue the failed portion of a partially failed task
    ///
    /// Only citation analysis supports this; the default refuses.
    async fn retry(&self, _transport: &Transport, _id: &TaskId) -> Result<RetryReceipt> {
        Err(Error::NotSupported(format!(
            "{} does not support partial retry",
            self.kind()
        )))
    }

    /// Sub-failures present in a normalized result
    ///
    /// Non-empty means the run completed only partially and is retry-eligible.
    fn partial_failures(&self, _output: &Self::Output) -> Vec<SubError> {
        Vec::new()
    }

    /// Merge a retry run's output into the previous run's output
    ///
    /// The default keeps only the fresh output; citation analysis merges by
    /// query text.
    fn merge_outputs(&self, _previous: Option<Self::Output>, fresh: Self::Output) -> Self::Output {
        fresh
    }
}

/// Parse a status payload into a snapshot, tolerating field drift
///
/// The status string may sit at the top level or under `data`; progress may
/// be a bare number, a `{percentage}` object, or a `{completed|processed,
/// total}` pair; failure detail may be `error`, `error_message`, or
/// `message`. A payload with no status string at all is malformed.
pub(crate) fn snapshot_from(payload: Value, context: &str) -> Result<StatusSnapshot> {
    let body = match payload.get("data") {
        Some(data) if data.get("status").is_some() => data.clone(),
        _ => payload,
    };

    let Some(raw_status) = body.get("status").and_then(Value::as_str) else {
        return Err(Error::MalformedResponse {
            context: format!("{context}: status field missing"),
        });
    };

    let status = TaskStatus::parse(raw_status);
    let progress = parse_progress(body.get("progress"));
    let detail = crate::normalize::str_field(&body, &["error", "error_message", "message"]);

    Ok(StatusSnapshot {
        status,
        progress,
        detail,
        payload: body,
    })
}

/// Interpret a progress figure in any of its wire shapes
pub(crate) fn parse_progress(value: Option<&Value>) -> Option<Progress> {
    match value? {
        Value::Number(n) => n.as_f64().map(Progress::Percent),
        Value::Object(map) => {
            if let Some(percentage) = map.get("percentage").and_then(Value::as_f64) {
                return Some(Progress::Percent(percentage));
            }
            let completed = map
                .get("completed")
                .or_else(|| map.get("processed"))
                .and_then(Value::as_u64)?;
            let total = map.get("total").and_then(Value::as_u64)?;
            Some(Progress::Ratio { completed, total })
        }
        _ => None,
    }
}
