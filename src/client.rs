//! Top-level client bundling the transport with per-feature coordinators

use crate::config::ClientConfig;
use crate::coordinator::TaskCoordinator;
use crate::error::Result;
use crate::features::{BacklinkAnalysis, CitationAnalysis, FaqGeneration, KeywordResearch};
use crate::transport::{CredentialProvider, Transport};
use std::sync::Arc;

/// Entry point: one configured transport, handed out to coordinators
///
/// The client itself is stateless; each coordinator it creates owns its own
/// lifecycle state, so a caller can run several features concurrently from
/// one client.
#[derive(Clone, Debug)]
pub struct AeoClient {
    transport: Transport,
    config: ClientConfig,
}

impl AeoClient {
    /// Build a client from configuration and a credential source
    ///
    /// Fails with [`crate::Error::Config`] when the base URL does not parse.
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let transport = Transport::new(&config, credentials)?;
        Ok(Self { transport, config })
    }

    /// The underlying transport, for callers issuing their own requests
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// A fresh keyword research coordinator
    pub fn keyword_research(&self) -> TaskCoordinator<KeywordResearch> {
        TaskCoordinator::new(KeywordResearch, self.transport.clone(), &self.config)
    }

    /// A fresh citation analysis coordinator
    pub fn citation_analysis(&self) -> TaskCoordinator<CitationAnalysis> {
        TaskCoordinator::new(CitationAnalysis, self.transport.clone(), &self.config)
    }

    /// A fresh backlink analysis coordinator
    pub fn backlink_analysis(&self) -> TaskCoordinator<BacklinkAnalysis> {
        TaskCoordinator::new(BacklinkAnalysis, self.transport.clone(), &self.config)
    }

    /// A fresh FAQ generation coordinator
    pub fn faq_generation(&self) -> TaskCoordinator<FaqGeneration> {
        TaskCoordinator::new(FaqGeneration, self.transport.clone(), &self.config)
    }
}
