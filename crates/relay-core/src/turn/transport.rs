//! Transport seam
//!
//! The orchestrator only needs "POST this JSON, give me the body as a byte
//! stream". [`HttpTransport`] does that over reqwest; tests swap in fakes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use crate::error::{TurnError, TurnResult};

pub type ByteStream = Pin<Box<dyn Stream<Item = TurnResult<Bytes>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `endpoint` and return the response body stream.
    ///
    /// Non-success responses are reported as [`TurnError::Transport`].
    async fn open(&self, endpoint: &str, body: Value) -> TurnResult<ByteStream>;
}

/// Authenticated HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_token: Option<String>) -> TurnResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| TurnError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        // Url::join drops the last path segment unless it ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> TurnResult<Url> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| TurnError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, endpoint: &str, body: Value) -> TurnResult<ByteStream> {
        let url = self.endpoint_url(endpoint)?;
        debug!(url = %url, "Opening turn stream");

        let mut request = self
            .client
            .post(url.clone())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %url, status = %status, "Turn request failed");
            return Err(TurnError::from_response(status, &body));
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TurnError::from)),
        ))
    }
}
