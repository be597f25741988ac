//! Configuration types for aeo-tasks

use crate::types::TaskKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling behavior for one poll session
///
/// The per-feature defaults differ only in tuning (interval and ceiling), not
/// semantics; treat them as configuration, not as meaningful constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum number of genuine status-check rounds (default: 60)
    ///
    /// Rate-limited backoff rounds do not count against this ceiling.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Steady-state interval between status checks (default: 2 seconds)
    ///
    /// Fixed, not exponential, for the non-rate-limited case.
    #[serde(default = "default_base_interval", with = "duration_serde")]
    pub base_interval: Duration,

    /// Absolute wall-clock ceiling for the whole session (default: 10 minutes)
    ///
    /// Independent of the attempt count; guards against a backend that
    /// responds quickly but never reaches a terminal state.
    #[serde(default = "default_max_wall_clock", with = "duration_serde")]
    pub max_wall_clock: Duration,

    /// Cap on the exponential backoff applied to rate-limited rounds
    /// (default: 30 seconds)
    #[serde(default = "default_backoff_cap", with = "duration_serde")]
    pub backoff_cap: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_interval: default_base_interval(),
            max_wall_clock: default_max_wall_clock(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

impl PollConfig {
    /// Default tuning for a feature
    ///
    /// Backlink analysis jobs run longer, so they poll slower with a higher
    /// ceiling; FAQ generation sits in between.
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::KeywordResearch | TaskKind::CitationAnalysis => Self::default(),
            TaskKind::BacklinkAnalysis => Self {
                max_attempts: 120,
                base_interval: Duration::from_secs(5),
                ..Self::default()
            },
            TaskKind::FaqGeneration => Self {
                max_attempts: 100,
                base_interval: Duration::from_secs(3),
                ..Self::default()
            },
        }
    }
}

/// Client configuration
///
/// The base URL is the only required setting; everything else has sensible
/// defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the job service (e.g. "https://api.example.com")
    pub base_url: String,

    /// Per-request timeout for a single HTTP exchange (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Poll tuning override for keyword research
    #[serde(default)]
    pub keyword_research: Option<PollConfig>,

    /// Poll tuning override for citation analysis
    #[serde(default)]
    pub citation_analysis: Option<PollConfig>,

    /// Poll tuning override for backlink analysis
    #[serde(default)]
    pub backlink_analysis: Option<PollConfig>,

    /// Poll tuning override for FAQ generation
    #[serde(default)]
    pub faq_generation: Option<PollConfig>,
}

impl ClientConfig {
    /// Configuration with defaults for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            keyword_research: None,
            citation_analysis: None,
            backlink_analysis: None,
            faq_generation: None,
        }
    }

    /// Resolve the poll tuning for a feature: explicit override, or the
    /// feature's default
    pub fn poll_config_for(&self, kind: TaskKind) -> PollConfig {
        let explicit = match kind {
            TaskKind::KeywordResearch => &self.keyword_research,
            TaskKind::CitationAnalysis => &self.citation_analysis,
            TaskKind::BacklinkAnalysis => &self.backlink_analysis,
            TaskKind::FaqGeneration => &self.faq_generation,
        };
        explicit.clone().unwrap_or_else(|| PollConfig::for_kind(kind))
    }
}

fn default_max_attempts() -> u32 {
    60
}

fn default_base_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_wall_clock() -> Duration {
    Duration::from_secs(600)
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("aeo-tasks/{}", env!("CARGO_PKG_VERSION"))
}

// Duration serialization helper (seconds-based)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
