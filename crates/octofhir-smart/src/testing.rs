//! Test doubles shared across modules.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::SmartResult;
use crate::error::SmartError;
use crate::transport::{HttpTransport, UpstreamResponse};

/// Canned responses keyed by URL; records every form post.
#[derive(Default)]
pub(crate) struct FakeTransport {
    responses: Mutex<HashMap<String, UpstreamResponse>>,
    posts: Mutex<Vec<(String, Vec<(String, String)>)>>,
    timeout: bool,
    timeouts: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub(crate) fn respond(&self, url: &str, status: u16, body: serde_json::Value) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            UpstreamResponse {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Discovery and token responses of a well-behaved `https://ehr.example`.
    pub(crate) fn ehr() -> Self {
        let transport = Self::default();
        transport.respond(
            "https://ehr.example/fhir/.well-known/smart-configuration",
            200,
            serde_json::json!({
                "authorization_endpoint": "https://ehr.example/authorize",
                "token_endpoint": "https://ehr.example/token",
            }),
        );
        transport.respond(
            "https://ehr.example/token",
            200,
            serde_json::json!({
                "access_token": "tok123",
                "token_type": "Bearer",
                "expires_in": 3600,
            }),
        );
        transport
    }

    /// Requests to `url` time out; others are answered as usual.
    pub(crate) fn time_out(&self, url: &str) {
        self.timeouts.lock().unwrap().insert(url.to_string());
    }

    /// Every request times out.
    pub(crate) fn timing_out() -> Self {
        Self {
            timeout: true,
            ..Default::default()
        }
    }

    fn response_for(&self, url: &Url) -> SmartResult<UpstreamResponse> {
        if self.timeout || self.timeouts.lock().unwrap().contains(url.as_str()) {
            return Err(SmartError::upstream_timeout(url.as_str()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or(UpstreamResponse {
                status: 404,
                body: String::new(),
            }))
    }

    pub(crate) fn posts(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get_json(&self, url: &Url) -> SmartResult<UpstreamResponse> {
        self.response_for(url)
    }

    async fn post_form(&self, url: &Url, fields: &[(&str, &str)]) -> SmartResult<UpstreamResponse> {
        self.posts.lock().unwrap().push((
            url.to_string(),
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        self.response_for(url)
    }
}
