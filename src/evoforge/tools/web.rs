//! Host-whitelisted web tool server.
//!
//! Outbound HTTP confined to an explicit host whitelist: a URL is allowed
//! when its host equals a whitelisted entry or is a subdomain of one. Only
//! GET-shaped tools are exposed.
//!
//! Tools: `fetch_url`, `fetch_json`.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::registry::{ToolMetadata, ToolServer, ToolServerMetadata};

#[derive(Debug, Clone)]
pub enum WebToolError {
    HostNotAllowed(String),
    InvalidUrl(String),
    MissingParam(String),
    Request(String),
}

impl fmt::Display for WebToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebToolError::HostNotAllowed(host) => write!(f, "host not allowed: {}", host),
            WebToolError::InvalidUrl(url) => write!(f, "invalid url: {}", url),
            WebToolError::MissingParam(p) => write!(f, "missing required parameter: {}", p),
            WebToolError::Request(msg) => write!(f, "request failed: {}", msg),
        }
    }
}

impl Error for WebToolError {}

/// GET-only HTTP access restricted to whitelisted hosts.
pub struct WebToolServer {
    allowed_hosts: Vec<String>,
    client: reqwest::Client,
}

impl WebToolServer {
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            allowed_hosts,
            client,
        }
    }

    /// A host passes when it equals a whitelisted entry or ends with
    /// `.{entry}`.
    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    fn validate_url(&self, raw: &str) -> Result<reqwest::Url, WebToolError> {
        let url =
            reqwest::Url::parse(raw).map_err(|_| WebToolError::InvalidUrl(raw.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| WebToolError::InvalidUrl(raw.to_string()))?;
        if !self.host_allowed(host) {
            return Err(WebToolError::HostNotAllowed(host.to_string()));
        }
        Ok(url)
    }

    async fn fetch(&self, params: &Value, as_json: bool) -> Result<Value, WebToolError> {
        let raw = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| WebToolError::MissingParam("url".into()))?;
        let url = self.validate_url(raw)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WebToolError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if as_json {
            let body: Value = response
                .json()
                .await
                .map_err(|e| WebToolError::Request(e.to_string()))?;
            Ok(json!({ "url": final_url, "status": status, "body": body }))
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| WebToolError::Request(e.to_string()))?;
            Ok(json!({
                "url": final_url,
                "status": status,
                "content": body,
                "content_length": body.len(),
            }))
        }
    }
}

#[async_trait]
impl ToolServer for WebToolServer {
    fn metadata(&self) -> ToolServerMetadata {
        ToolServerMetadata {
            name: "web".into(),
            version: "1.0.0".into(),
            description: "GET-only HTTP access restricted to whitelisted hosts".into(),
            tools: vec![
                ToolMetadata::new("fetch_url", "GET a URL and return its text body").idempotent(),
                ToolMetadata::new("fetch_json", "GET a URL and parse its body as JSON")
                    .idempotent(),
            ],
        }
    }

    async fn call(
        &self,
        tool: &str,
        params: Value,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let result = match tool {
            "fetch_url" => self.fetch(&params, false).await,
            "fetch_json" => self.fetch(&params, true).await,
            other => Err(WebToolError::MissingParam(format!("unknown tool: {}", other))),
        };
        result.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
    }
}
