//! FAQ generation feature
//!
//! FAQ endpoints answer with `{success, data}` envelopes instead of the
//! `{status, message, response}` shape the other features use, and the
//! finished question/answer pairs ride along inside the terminal status
//! payload rather than behind a separate results endpoint.

use crate::error::{Error, Result};
use crate::normalize;
use crate::transport::Transport;
use crate::types::{Faq, FaqReport, StatusSnapshot, TaskHandle, TaskId, TaskKind, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Parameters for an FAQ generation job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaqParams {
    /// Topic, URL, or pasted content to generate questions from
    pub input: String,
    /// Sampling temperature forwarded to the generator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl FaqParams {
    /// Parameters for an input with default generation options
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            temperature: None,
        }
    }
}

/// FAQ generation: `POST /api/faq/task` to submit, `GET /api/faq/task/{id}`
/// for status, results embedded in the terminal status payload
#[derive(Clone, Copy, Debug, Default)]
pub struct FaqGeneration;

#[async_trait]
impl super::Feature for FaqGeneration {
    type Params = FaqParams;
    type Output = FaqReport;

    fn kind(&self) -> TaskKind {
        TaskKind::FaqGeneration
    }

    async fn submit(&self, transport: &Transport, params: &Self::Params) -> Result<TaskHandle> {
        let mut body = json!({"input": params.input});
        if let Some(temperature) = params.temperature {
            body["options"] = json!({"temperature": temperature});
        }
        let payload = transport.post_raw("/api/faq/task", Some(&body)).await?;

        // Submissions have arrived as {task_id}, {success, data: {task_id}},
        // and doubly nested {success, data: {data: {task_id}}}.
        let id: TaskId = find_task_id(&payload)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or(Error::MalformedResponse {
                context: "faq submit: task_id missing".to_string(),
            })?;
        tracing::info!(task_id = %id, "FAQ generation submitted");
        Ok(TaskHandle {
            id,
            status: TaskStatus::Pending,
        })
    }

    async fn fetch_status(&self, transport: &Transport, id: &TaskId) -> Result<StatusSnapshot> {
        let payload = transport.get_raw(&format!("/api/faq/task/{id}")).await?;
        super::snapshot_from(payload, "faq status")
    }

    async fn fetch_result(
        &self,
        _transport: &Transport,
        id: &TaskId,
        terminal: &StatusSnapshot,
    ) -> Result<Self::Output> {
        normalize_report(id, &terminal.payload)
    }
}

fn find_task_id(payload: &Value) -> Option<&Value> {
    if let Some(id) = payload.get("task_id") {
        return Some(id);
    }
    let data = payload.get("data")?;
    data.get("task_id")
        .or_else(|| data.get("data").and_then(|inner| inner.get("task_id")))
}

/// Normalize the FAQs embedded in a terminal status payload
///
/// Pairs live under `faqs` or `results.faqs`; entries missing their question
/// or answer text are dropped. A completed payload with no recognizable FAQ
/// collection is malformed.
fn normalize_report(id: &TaskId, payload: &Value) -> Result<FaqReport> {
    let container = match payload.get("results") {
        Some(results) if results.get("faqs").is_some() => results,
        _ => payload,
    };
    let items = normalize::require_collection(container, &["faqs"], "faq result")?;

    let faqs = items
        .iter()
        .filter_map(|item| {
            Some(Faq {
                question: item.get("question")?.as_str()?.to_string(),
                answer: item.get("answer")?.as_str()?.to_string(),
                source: normalize::str_field(item, &["source"]),
            })
        })
        .collect();

    Ok(FaqReport {
        task_id: id.clone(),
        faqs,
    })
}
