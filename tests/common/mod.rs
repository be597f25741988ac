//! Shared helpers for wiremock-backed integration tests

use aeo_tasks::{AeoClient, ClientConfig, PollConfig, StaticCredentials};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const TOKEN: &str = "integration-token";

/// Poll tuning tight enough for real-time tests
pub fn fast_poll() -> PollConfig {
    PollConfig {
        max_attempts: 20,
        base_interval: Duration::from_millis(10),
        max_wall_clock: Duration::from_secs(5),
        backoff_cap: Duration::from_millis(80),
    }
}

/// Client pointed at the mock server, all features on fast poll tuning
pub fn client_for(server: &MockServer) -> AeoClient {
    let mut config = ClientConfig::new(server.uri());
    config.keyword_research = Some(fast_poll());
    config.citation_analysis = Some(fast_poll());
    config.backlink_analysis = Some(fast_poll());
    config.faq_generation = Some(fast_poll());
    AeoClient::new(config, Arc::new(StaticCredentials::new(TOKEN)))
        .expect("client construction failed")
}
