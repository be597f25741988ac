//! Authenticated request/response exchange with the job service
//!
//! The transport issues single HTTP exchanges and normalizes the service's
//! response envelope into one typed success/failure path. It never retries;
//! retry decisions belong to the poll loop and to callers.
//!
//! The service wraps most payloads in `{status, message, response}` but some
//! endpoints return the payload bare; both are tolerated. When the envelope is
//! present its numeric status wins over the HTTP status line.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Supplies the bearer credential attached to every request
///
/// An explicit dependency injected at construction: request code never
/// consults ambient globals for auth state.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, or `None` for unauthenticated requests
    async fn bearer_token(&self) -> Option<String>;
}

/// Fixed token credential provider
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Provider that always presents the given token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Provider for endpoints that need no credential
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// HTTP transport for the job service
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The credential provider is opaque and must never leak into logs
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport from client configuration and a credential provider
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the base URL does not parse or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base_url {:?}: {e}", config.base_url),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// GET a path, unwrapping the envelope into the raw payload
    pub async fn get_raw(&self, path: &str) -> Result<Value> {
        let url = self.join(path)?;
        tracing::debug!(%url, "GET");
        let request = self.client.get(url);
        self.execute(request).await
    }

    /// POST a path with an optional JSON body, unwrapping the envelope
    pub async fn post_raw<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value> {
        let url = self.join(path)?;
        tracing::debug!(%url, "POST");
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await
    }

    /// GET a path and deserialize the unwrapped payload
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.get_raw(path).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// POST a path and deserialize the unwrapped payload
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let value = self.post_raw(path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| Error::Config {
            message: format!("invalid request path {path:?}: {e}"),
        })
    }

    async fn execute(&self, mut request: reqwest::RequestBuilder) -> Result<Value> {
        if let Some(token) = self.credentials.bearer_token().await {
            request = request.bearer_auth(token);
        }
        request = request.header(reqwest::header::ACCEPT, "application/json");

        let response = request.send().await?;
        let http_status = response.status().as_u16();
        let body = response.text().await?;

        let value: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(e) => {
                if (200..300).contains(&http_status) {
                    return Err(Error::Serialization(e));
                }
                // Non-JSON error body; fall back to the HTTP status line
                return Err(Error::from_status(http_status, truncate(&body)));
            }
        };

        unwrap_envelope(http_status, value)
    }
}

/// Unwrap `{status, message, response}` or pass a bare payload through
///
/// The envelope is recognized by a numeric (or `"success"`) `status` field
/// alongside a `response` or `message` field; its status overrides the HTTP
/// status. Anything else is treated as a bare payload judged by the HTTP
/// status alone.
fn unwrap_envelope(http_status: u16, value: Value) -> Result<Value> {
    if let Value::Object(map) = &value {
        let looks_wrapped = map.contains_key("response") || map.contains_key("message");
        if looks_wrapped {
            if let Some(code) = envelope_code(map.get("status")) {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string();
                return if (200..300).contains(&code) {
                    Ok(map.get("response").cloned().unwrap_or(Value::Null))
                } else {
                    Err(Error::from_status(code, message))
                };
            }
        }
    }

    if (200..300).contains(&http_status) {
        Ok(value)
    } else {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        Err(Error::from_status(http_status, message))
    }
}

fn envelope_code(status: Option<&Value>) -> Option<u16> {
    match status? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        // Some endpoints report {"status": "success", ...}
        Value::String(s) if s == "success" => Some(200),
        _ => None,
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
