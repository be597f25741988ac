//! Core types for aeo-tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a remote task
///
/// The service assigns integer ids to some features (keyword research,
/// citation analysis) and opaque string ids to others (backlink analysis, FAQ
/// generation). Both wire shapes round-trip through this one type; once
/// assigned, an id is immutable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    /// Numeric id as assigned by the service
    Int(i64),
    /// Opaque string id as assigned by the service
    Str(String),
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskId::Int(id) => write!(f, "{id}"),
            TaskId::Str(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        TaskId::Int(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        TaskId::Str(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        TaskId::Str(id)
    }
}

/// Which analysis feature a task belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Keyword research (volumes, competition, clusters)
    KeywordResearch,
    /// AI-citation analysis across answer engines
    CitationAnalysis,
    /// Backlink fetch with PBN risk classification
    BacklinkAnalysis,
    /// FAQ generation from a topic or URL
    FaqGeneration,
}

impl TaskKind {
    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::KeywordResearch => "keyword_research",
            TaskKind::CitationAnalysis => "citation_analysis",
            TaskKind::BacklinkAnalysis => "backlink_analysis",
            TaskKind::FaqGeneration => "faq_generation",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote task status
///
/// Each feature emits a subset of these. Strings the client does not recognize
/// are preserved in [`TaskStatus::Unknown`] and treated as non-terminal; an
/// unexpected status must never crash a poll loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Accepted, not yet picked up by a worker
    Pending,
    /// Waiting in the service-side queue
    Queued,
    /// Actively being processed
    Processing,
    /// Generating output (FAQ generation only)
    Generating,
    /// Finished successfully; a result is available
    Completed,
    /// Finished unsuccessfully; error detail is available
    Failed,
    /// A status string this client does not recognize (non-terminal)
    Unknown(String),
}

impl TaskStatus {
    /// Parse a service-supplied status string
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => TaskStatus::Pending,
            "queued" => TaskStatus::Queued,
            "processing" => TaskStatus::Processing,
            "generating" => TaskStatus::Generating,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            other => TaskStatus::Unknown(other.to_string()),
        }
    }

    /// True for `completed` and `failed`; no further transitions are valid
    /// and the task must never be polled again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only
    /// lifecycle `{pending|queued -> processing -> completed|failed}`
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            TaskStatus::Completed | TaskStatus::Failed => false,
            TaskStatus::Pending => true,
            TaskStatus::Queued => !matches!(next, TaskStatus::Pending),
            TaskStatus::Processing | TaskStatus::Generating => {
                !matches!(next, TaskStatus::Pending | TaskStatus::Queued)
            }
            TaskStatus::Unknown(_) => true,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Generating => write!(f, "generating"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TaskStatus::parse(&raw))
    }
}

/// Structured progress measure reported by a status endpoint
///
/// Some features report a bare percentage, others a processed/total pair, and
/// some report nothing at all. Absent progress is valid and is never treated
/// as zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Progress {
    /// A direct 0-100 percentage
    Percent(f64),
    /// A (completed, total) pair
    Ratio {
        /// Sub-units finished so far
        completed: u64,
        /// Total sub-units in the task
        total: u64,
    },
}

impl Progress {
    /// Compute a 0-100 percentage, if one is interpretable
    ///
    /// A ratio with `total == 0` yields `None` rather than a fabricated value.
    pub fn percent(&self) -> Option<f64> {
        match self {
            Progress::Percent(p) => Some(p.clamp(0.0, 100.0)),
            Progress::Ratio { total: 0, .. } => None,
            Progress::Ratio { completed, total } => {
                Some((*completed as f64 / *total as f64 * 100.0).clamp(0.0, 100.0))
            }
        }
    }
}

/// What task submission returns: the assigned id plus the initial status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Service-assigned task id
    pub id: TaskId,
    /// Initial lifecycle state (usually `pending` or `queued`)
    pub status: TaskStatus,
}

/// One observed status response for a task
///
/// The raw payload is retained so features whose results are embedded in the
/// terminal status response (FAQ generation) can normalize from it without a
/// second fetch.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    /// Status reported by the service
    pub status: TaskStatus,
    /// Progress figure, when one was present and interpretable
    pub progress: Option<Progress>,
    /// Error message accompanying a `failed` status, when present
    pub detail: Option<String>,
    /// The raw JSON body the status came from
    pub payload: serde_json::Value,
}

impl StatusSnapshot {
    /// Snapshot with just a status, no progress or payload
    pub fn of(status: TaskStatus) -> Self {
        Self {
            status,
            progress: None,
            detail: None,
            payload: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized result shapes
// ---------------------------------------------------------------------------

/// A single researched keyword
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// The keyword text
    pub keyword: String,
    /// Monthly search volume; absent means not yet available, not zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_volume: Option<u64>,
    /// Competition score 0-1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competition: Option<f64>,
    /// Cost per click in USD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpc: Option<f64>,
    /// Search intent label, when classified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Cluster this keyword was grouped into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i64>,
    /// Which upstream source produced the keyword
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A topical cluster of keywords
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeywordCluster {
    /// Cluster id
    pub id: i64,
    /// Human-readable topic name
    pub topic_name: String,
    /// Number of keywords grouped into the cluster
    pub keyword_count: u64,
}

/// Canonical keyword research result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeywordReport {
    /// Task id the report came from
    pub task_id: TaskId,
    /// The query the research was submitted for
    pub query: String,
    /// Researched keywords in service order
    pub keywords: Vec<Keyword>,
    /// Topical clusters, when clustering was enabled
    pub clusters: Vec<KeywordCluster>,
}

/// A cited source reference, normalized from either a bare URL string or a
/// `{url, relevance}` object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CitationReference {
    /// The cited URL (always present)
    pub url: String,
    /// Relevance score, when the provider supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

/// One answer-engine provider's verdict for a single query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderAnalysis {
    /// Provider name (e.g. "gpt", "gemini", "dataforseo")
    pub provider: String,
    /// Whether the analyzed domain was cited in the provider's answer
    pub citation_found: bool,
    /// Provider confidence, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Sources the provider cited
    pub references: Vec<CitationReference>,
}

/// Citation analysis outcome for one query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// The query text
    pub query: String,
    /// Per-provider verdicts
    pub providers: Vec<ProviderAnalysis>,
}

/// Aggregate per-provider citation scores
///
/// Absent scores mean the provider has not reported yet; they are kept
/// `None` rather than coerced to zero, since 0 is a meaningful score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationScores {
    /// GPT aggregate score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt: Option<f64>,
    /// Gemini aggregate score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini: Option<f64>,
    /// DataForSEO aggregate score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataforseo: Option<f64>,
}

/// Canonical citation analysis result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Task id the report came from
    pub task_id: TaskId,
    /// The URL whose citations were analyzed
    pub url: String,
    /// Per-query analyses for the queries that completed
    pub analyses: Vec<QueryAnalysis>,
    /// Aggregate scores
    pub scores: CitationScores,
    /// Sub-queries that failed; non-empty means the run is retry-eligible
    pub failed_queries: Vec<crate::error::SubError>,
}

impl CitationReport {
    /// Merge a retry run's analyses into this report
    ///
    /// Entries are keyed by query text: a fresh analysis replaces a failed or
    /// stale entry for the same query and new queries are appended, so the 8
    /// already-succeeded entries of a 10-query run are never duplicated.
    pub fn merge(&mut self, fresh: CitationReport) {
        for analysis in fresh.analyses {
            match self.analyses.iter_mut().find(|a| a.query == analysis.query) {
                Some(existing) => *existing = analysis,
                None => self.analyses.push(analysis),
            }
        }
        // A retried query is no longer failed
        self.failed_queries
            .retain(|f| !self.analyses.iter().any(|a| a.query == f.query));
        for failure in fresh.failed_queries {
            if !self.failed_queries.iter().any(|f| f.query == failure.query) {
                self.failed_queries.push(failure);
            }
        }
        if fresh.scores.gpt.is_some() {
            self.scores.gpt = fresh.scores.gpt;
        }
        if fresh.scores.gemini.is_some() {
            self.scores.gemini = fresh.scores.gemini;
        }
        if fresh.scores.dataforseo.is_some() {
            self.scores.dataforseo = fresh.scores.dataforseo;
        }
    }
}

/// Count returned by the citation retry endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryReceipt {
    /// The task id the retry was queued against
    pub task_id: TaskId,
    /// How many failed sub-queries were re-queued
    pub missing_count: u64,
}

/// PBN risk classification for a backlink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Unlikely to be part of a private blog network
    Low,
    /// Some PBN signals present
    Medium,
    /// Strong PBN signals present
    High,
    /// Almost certainly a PBN link
    Critical,
}

/// A single analyzed backlink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Backlink {
    /// Page the link was found on
    pub source_url: String,
    /// Linking domain
    pub domain_from: String,
    /// Anchor text
    #[serde(default)]
    pub anchor: String,
    /// "dofollow" or "nofollow"
    #[serde(default)]
    pub link_type: String,
    /// Linking domain's rank, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_rank: Option<u32>,
    /// Estimated probability the link comes from a PBN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pbn_probability: Option<f64>,
    /// Risk classification, when the service assigned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
}

/// Aggregate backlink counts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklinkSummary {
    /// Total backlinks analyzed
    pub total_backlinks: u64,
    /// Dofollow links
    pub dofollow_count: u64,
    /// Nofollow links
    pub nofollow_count: u64,
}

/// PBN detection counts by risk bucket
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbnDetection {
    /// Links classified high or critical risk
    pub high_risk_count: u64,
    /// Links classified medium risk
    pub medium_risk_count: u64,
    /// Links classified low risk
    pub low_risk_count: u64,
}

/// Canonical backlink analysis result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacklinkReport {
    /// Task id the report came from
    pub task_id: TaskId,
    /// The domain whose backlinks were analyzed
    pub domain: String,
    /// Analyzed backlinks in service order
    pub backlinks: Vec<Backlink>,
    /// Aggregate counts
    pub summary: BacklinkSummary,
    /// PBN risk buckets
    pub pbn_detection: PbnDetection,
    /// When the service finished the analysis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A generated question/answer pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Faq {
    /// The question
    pub question: String,
    /// The answer
    pub answer: String,
    /// Where the question was sourced from, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Canonical FAQ generation result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaqReport {
    /// Task id the report came from
    pub task_id: TaskId,
    /// Generated question/answer pairs in service order
    pub faqs: Vec<Faq>,
}
