//! HTTP transport seam.
//!
//! The executor talks to the network only through [`HttpTransport`], so retry
//! and polling behavior can be exercised against scripted replies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::ConfigError;

/// One HTTP request as issued by the executor. Immutable per call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Human-readable name used in logs and error messages.
    pub label: String,
}

impl RequestContext {
    pub fn get(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            label: label.into(),
        }
    }

    pub fn post(url: impl Into<String>, label: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers: Vec::new(),
            body: Some(body),
            label: label.into(),
        }
    }

    /// Append headers. Later duplicates are sent as well, order is irrelevant.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Raw reply before any status classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// DNS, connection, timeout or body-read failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RequestContext) -> Result<HttpReply, TransportError>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RequestContext) -> Result<HttpReply, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {e}")))?;

        Ok(HttpReply { status, body })
    }
}

/// `Authorization` and `Content-Type` headers for a bearer-token API.
pub fn auth_headers(api_key: &str) -> Vec<(String, String)> {
    vec![
        ("Authorization".to_string(), format!("Bearer {api_key}")),
        ("Content-Type".to_string(), "application/json".to_string()),
    ]
}

/// Protocol header required on every Assistants API call.
pub fn assistants_beta_header() -> (String, String) {
    ("OpenAI-Beta".to_string(), "assistants=v2".to_string())
}

/// Join a base URL and a path without doubling slashes.
pub fn api_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_normalizes_slashes() {
        assert_eq!(
            api_url("https://api.openai.com/v1/", "/threads"),
            "https://api.openai.com/v1/threads"
        );
        assert_eq!(
            api_url("http://127.0.0.1:9000/v1", "chat/completions"),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[test]
    fn auth_headers_use_bearer_scheme() {
        let headers = auth_headers("sk-test");
        assert!(headers.contains(&("Authorization".to_string(), "Bearer sk-test".to_string())));
        assert!(headers.contains(&(
            "Content-Type".to_string(),
            "application/json".to_string()
        )));
    }

    #[test]
    fn reply_success_range() {
        assert!(HttpReply::new(200, "{}").is_success());
        assert!(HttpReply::new(204, "").is_success());
        assert!(!HttpReply::new(302, "").is_success());
        assert!(!HttpReply::new(404, "").is_success());
    }
}
