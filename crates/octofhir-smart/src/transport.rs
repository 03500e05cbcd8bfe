//! Upstream HTTP transport.
//!
//! Discovery and token requests go through [`HttpTransport`] so the flow
//! controller never deals with `reqwest` directly. Every call carries the
//! configured timeout and is attempted exactly once: authorization codes and
//! PKCE verifiers are single-use, so a retry could only fail or duplicate.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use crate::SmartResult;
use crate::error::SmartError;

/// Raw upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl UpstreamResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not the expected shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Outbound HTTP used by discovery, token exchange and backend services.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// `GET url` with `Accept: application/json`.
    async fn get_json(&self, url: &Url) -> SmartResult<UpstreamResponse>;

    /// `POST url` with an `application/x-www-form-urlencoded` body.
    async fn post_form(&self, url: &Url, fields: &[(&str, &str)]) -> SmartResult<UpstreamResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> SmartResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmartError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    /// Wraps an existing client. Its timeout settings are used as-is.
    #[must_use]
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn read(url: &Url, response: reqwest::Response) -> SmartResult<UpstreamResponse> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Ok(UpstreamResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, url: &Url) -> SmartResult<UpstreamResponse> {
        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Self::read(url, response).await
    }

    async fn post_form(&self, url: &Url, fields: &[(&str, &str)]) -> SmartResult<UpstreamResponse> {
        let response = self
            .http_client
            .post(url.as_str())
            .header("Accept", "application/json")
            .form(fields)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Self::read(url, response).await
    }
}

/// Maps a `reqwest` failure onto the timeout / transport split.
pub(crate) fn map_reqwest_error(url: &Url, err: reqwest::Error) -> SmartError {
    if err.is_timeout() {
        tracing::warn!("Upstream request to {} timed out", url);
        SmartError::upstream_timeout(url.as_str())
    } else {
        tracing::warn!("Upstream request to {} failed: {}", url, err);
        SmartError::transport(err.to_string())
    }
}
