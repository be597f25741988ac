//! # aeo-tasks
//!
//! Typed async client for a remote answer-engine-optimization job service.
//! Four analysis features run as long-lived server-side tasks; this crate
//! submits them, polls them to a terminal state with backoff and cooperative
//! cancellation, and normalizes the drifting wire payloads into stable result
//! types.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **One engine, four features** - Submission, polling, and lifecycle rules
//!   are shared; endpoints and payload shapes vary per feature
//! - **Tolerant in, strict out** - Wire drift (envelopes, field aliases,
//!   list-vs-map collections) is absorbed at the edge; results come out as
//!   one canonical shape per feature
//! - **Cooperative cancellation** - Every sleep races a cancellation token;
//!   no timer outlives its task
//!
//! ## Quick Start
//!
//! ```no_run
//! use aeo_tasks::{
//!     AeoClient, ClientConfig, KeywordResearchParams, PollHooks, StaticCredentials,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("https://api.example.com");
//!     let client = AeoClient::new(config, Arc::new(StaticCredentials::new("token")))?;
//!
//!     let coordinator = client.keyword_research();
//!     let hooks = PollHooks::none()
//!         .on_progress(|percent| println!("{percent:.0}%"))
//!         .on_status_change(|status| println!("status: {status}"));
//!
//!     let report = coordinator
//!         .start(&KeywordResearchParams::new("best crm for startups"), hooks)
//!         .await?;
//!     println!("{} keywords", report.keywords.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Rate-limit backoff policy and transient-error classification
pub mod backoff;
/// Top-level client
pub mod client;
/// Client and poll configuration
pub mod config;
/// Task lifecycle coordination
pub mod coordinator;
/// Error types
pub mod error;
/// Per-feature submitters, status fetchers, and result normalizers
pub mod features;
/// Tolerant payload normalization helpers
pub mod normalize;
/// Status polling engine
pub mod poll;
/// Authenticated HTTP transport and envelope unwrapping
pub mod transport;
/// Core task and result types
pub mod types;

// Re-export commonly used types
pub use client::AeoClient;
pub use config::{ClientConfig, PollConfig};
pub use coordinator::{Phase, TaskCoordinator};
pub use error::{Error, Result, SubError, TimeoutKind};
pub use features::backlinks::BacklinkParams;
pub use features::citations::CitationParams;
pub use features::faq::FaqParams;
pub use features::keywords::KeywordResearchParams;
pub use features::{
    BacklinkAnalysis, CitationAnalysis, FaqGeneration, Feature, KeywordResearch,
};
pub use poll::{PollHooks, PollSession, poll_task};
pub use transport::{CredentialProvider, NoCredentials, StaticCredentials, Transport};
pub use types::{
    BacklinkReport, CitationReport, FaqReport, KeywordReport, Progress, RetryReceipt,
    StatusSnapshot, TaskHandle, TaskId, TaskKind, TaskStatus,
};
