//! HTTP JSON-RPC transport for MCP servers
//!
//! This module implements [`HttpTransport`], which talks to an MCP server
//! exposed over plain HTTP:
//!
//! - `connect` issues `GET <base>/health`; only `200 OK` counts as healthy.
//! - `send_request` POSTs the JSON-RPC envelope to `<base>/mcp` and validates
//!   the JSON reply body against the request id.
//!
//! The transport keeps no session state beyond the pooled `reqwest::Client`,
//! so concurrent calls need no extra locking. The configured timeout applies
//! to each HTTP request individually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{ParleyError, Result};
use crate::mcp::config::HttpTransportConfig;
use crate::mcp::envelope::validate_reply;
use crate::mcp::transport::{RequestIds, Transport};
use crate::mcp::types::JsonRpcRequest;

/// HTTP-POST MCP transport.
///
/// # Examples
///
/// ```no_run
/// use parley::mcp::config::HttpTransportConfig;
/// use parley::mcp::transport::http::HttpTransport;
/// use parley::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(&HttpTransportConfig::new("http://localhost:3000"))?;
/// transport.connect().await?;
/// let tools = transport.send_request("tools/list", None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    ids: RequestIds,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport for `config`. No network I/O is performed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when `base_url` is not an absolute
    /// http(s) URL and `ConnectionFailed` if the HTTP client cannot be built.
    pub fn new(config: &HttpTransportConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.base_url).map_err(|e| {
            ParleyError::ValidationFailed(format!("invalid base_url `{}`: {}", config.base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ParleyError::ValidationFailed(format!(
                "base_url must use http or https, got `{}`",
                parsed.scheme()
            ))
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                ParleyError::ConnectionFailed(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            ids: RequestIds::new(),
            connected: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => req.bearer_auth(key),
            _ => req,
        }
    }
}

fn send_error(e: reqwest::Error) -> ParleyError {
    if e.is_timeout() {
        ParleyError::Timeout(format!("HTTP request timed out: {}", e))
    } else {
        ParleyError::ConnectionFailed(format!("HTTP request failed: {}", e))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        let url = self.endpoint("health");
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                ParleyError::ConnectionFailed(format!("health probe {} failed: {}", url, e))
            })?;

        if response.status() != StatusCode::OK {
            self.connected.store(false, Ordering::SeqCst);
            return Err(ParleyError::ConnectionFailed(format!(
                "health probe {} returned HTTP {}",
                url,
                response.status()
            ))
            .into());
        }

        tracing::info!(base_url = %self.base_url, "connected to HTTP MCP server");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if !self.is_connected() {
            return Err(ParleyError::ConnectionFailed(format!(
                "HTTP MCP server {} is not connected",
                self.base_url
            ))
            .into());
        }

        let id = self.ids.next_id();
        let request = JsonRpcRequest::new(&id, method, params);
        tracing::debug!(target: "parley::wire", id = %id, method, "http request");

        let response = self
            .authorize(self.client.post(self.endpoint("mcp")))
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::UpstreamFailed {
                code: i64::from(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            }
            .into());
        }

        let body = response.text().await.map_err(send_error)?;
        validate_reply(&body, &id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
