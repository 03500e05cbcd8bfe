//! FHIR resource API client.
//!
//! Every call carries the bearer token of a [`Session`] and is reported to
//! the audit sink. Expired sessions are refused before any request is sent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use super::envelope::ResourceEnvelope;
use crate::SmartResult;
use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::error::SmartError;
use crate::session::Session;
use crate::transport::map_reqwest_error;

const FHIR_JSON: &str = "application/fhir+json";

/// Thin FHIR REST client authorised by a session.
pub struct FhirResourceClient {
    http: reqwest::Client,
    base_url: String,
    audit: Arc<dyn AuditSink>,
}

impl FhirResourceClient {
    /// Creates a client for the FHIR server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> SmartResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmartError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    fn fhir_url(&self, path: &str) -> SmartResult<Url> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| SmartError::invalid_request(format!("Invalid resource URL: {e}")))
    }

    fn request(
        &self,
        session: &Session,
        method: reqwest::Method,
        url: &Url,
    ) -> SmartResult<reqwest::RequestBuilder> {
        if session.is_expired() {
            return Err(SmartError::SessionExpired);
        }
        Ok(self
            .http
            .request(method, url.as_str())
            .bearer_auth(&session.access_token)
            .header("Accept", FHIR_JSON))
    }

    /// `GET {type}/{id}`.
    pub async fn read(&self, session: &Session, resource_type: &str, id: &str) -> SmartResult<Value> {
        let result = async {
            let url = self.fhir_url(&format!("{resource_type}/{id}"))?;
            let resp = self
                .request(session, reqwest::Method::GET, &url)?
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, e))?;
            handle_response(resp).await
        }
        .await;
        self.audit_call(session, AuditAction::Read, resource_type, Some(id), &result);
        result
    }

    /// `POST {type}` with a body whose `resourceType` matches.
    pub async fn create(&self, session: &Session, resource_type: &str, body: Value) -> SmartResult<Value> {
        let result = async {
            let envelope = ResourceEnvelope::for_create(body, resource_type)?;
            let url = self.fhir_url(resource_type)?;
            let resp = self
                .request(session, reqwest::Method::POST, &url)?
                .header("Content-Type", FHIR_JSON)
                .json(&envelope)
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, e))?;
            handle_response(resp).await
        }
        .await;
        self.audit_call(session, AuditAction::Create, resource_type, None, &result);
        result
    }

    /// `PUT {type}/{id}`. A body `id` must equal `id`.
    pub async fn update(
        &self,
        session: &Session,
        resource_type: &str,
        id: &str,
        body: Value,
    ) -> SmartResult<Value> {
        let result = async {
            let envelope = ResourceEnvelope::for_update(body, resource_type, id)?;
            let url = self.fhir_url(&format!("{resource_type}/{id}"))?;
            let resp = self
                .request(session, reqwest::Method::PUT, &url)?
                .header("Content-Type", FHIR_JSON)
                .json(&envelope)
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, e))?;
            handle_response(resp).await
        }
        .await;
        self.audit_call(session, AuditAction::Update, resource_type, Some(id), &result);
        result
    }

    /// `DELETE {type}/{id}`.
    pub async fn delete(&self, session: &Session, resource_type: &str, id: &str) -> SmartResult<()> {
        let result = async {
            let url = self.fhir_url(&format!("{resource_type}/{id}"))?;
            let resp = self
                .request(session, reqwest::Method::DELETE, &url)?
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, e))?;
            handle_response(resp).await.map(|_| ())
        }
        .await;
        self.audit_call(session, AuditAction::Delete, resource_type, Some(id), &result);
        result
    }

    /// `GET {type}?params`.
    pub async fn search(
        &self,
        session: &Session,
        resource_type: &str,
        params: &[(String, String)],
    ) -> SmartResult<Value> {
        let result = async {
            let url = self.fhir_url(resource_type)?;
            let resp = self
                .request(session, reqwest::Method::GET, &url)?
                .query(params)
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, e))?;
            handle_response(resp).await
        }
        .await;
        self.audit_call(session, AuditAction::Search, resource_type, None, &result);
        result
    }

    fn audit_call<T>(
        &self,
        session: &Session,
        action: AuditAction,
        resource_type: &str,
        id: Option<&str>,
        result: &SmartResult<T>,
    ) {
        let event = match result {
            Ok(_) => AuditEvent::new(&session.session_id, action, AuditOutcome::Success),
            Err(e) => AuditEvent::new(&session.session_id, action, AuditOutcome::Failure)
                .with_details(serde_json::json!({ "error": e.to_string() })),
        };
        self.audit.record(event.with_resource(resource_type, id));
    }
}

async fn handle_response(resp: reqwest::Response) -> SmartResult<Value> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        if let Ok(json) = serde_json::from_str::<Value>(&body)
            && json.get("resourceType").and_then(|v| v.as_str()) == Some("OperationOutcome")
            && let Some(issues) = json.get("issue").and_then(|v| v.as_array())
        {
            let msgs: Vec<&str> = issues
                .iter()
                .filter_map(|i| i.get("diagnostics").and_then(|d| d.as_str()))
                .collect();
            if !msgs.is_empty() {
                return Err(SmartError::resource(status.as_u16(), msgs.join("; ")));
            }
        }
        return Err(SmartError::resource(status.as_u16(), body));
    }

    if body.is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body)
        .map_err(|e| SmartError::resource(status.as_u16(), format!("Failed to parse response JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use serde_json::json;
    use time::OffsetDateTime;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(lifetime: time::Duration) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            session_id: "sess-1".to_string(),
            access_token: "tok123".to_string(),
            token_type: "Bearer".to_string(),
            scope: Some("system/*.*".to_string()),
            patient: None,
            encounter: None,
            fhir_base_url: None,
            issued_at: now,
            expires_at: now + lifetime,
        }
    }

    fn live() -> Session {
        session(time::Duration::hours(1))
    }

    async fn client(server: &MockServer) -> (FhirResourceClient, MemoryAuditSink) {
        let audit = MemoryAuditSink::new();
        let client = FhirResourceClient::new(&server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_audit_sink(Arc::new(audit.clone()));
        (client, audit)
    }

    #[tokio::test]
    async fn test_read_sends_bearer_and_fhir_accept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Patient/123"))
            .and(header("Authorization", "Bearer tok123"))
            .and(header("Accept", FHIR_JSON))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Patient", "id": "123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, audit) = client(&server).await;
        let patient = client.read(&live(), "Patient", "123").await.unwrap();
        assert_eq!(patient["id"], "123");

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Read);
        assert_eq!(events[0].resource_id.as_deref(), Some("123"));
        assert_eq!(events[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_expired_session_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, audit) = client(&server).await;
        let expired = session(time::Duration::seconds(-1));
        let err = client.read(&expired, "Patient", "123").await.unwrap_err();
        assert!(matches!(err, SmartError::SessionExpired));
        assert_eq!(audit.events()[0].outcome, AuditOutcome::Failure);
    }

    #[tokio::test]
    async fn test_create_sends_body_unchanged() {
        let server = MockServer::start().await;
        let body = json!({"resourceType": "Observation", "status": "final"});
        Mock::given(method("POST"))
            .and(path("/Observation"))
            .and(header("Content-Type", FHIR_JSON))
            .and(body_json(body.clone()))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"resourceType": "Observation", "id": "new"})),
            )
            .mount(&server)
            .await;

        let (client, _) = client(&server).await;
        let created = client.create(&live(), "Observation", body).await.unwrap();
        assert_eq!(created["id"], "new");
    }

    #[tokio::test]
    async fn test_create_with_wrong_type_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _) = client(&server).await;
        let err = client
            .create(&live(), "Patient", json!({"resourceType": "Observation"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SmartError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_id_mismatch() {
        let server = MockServer::start().await;
        let (client, _) = client(&server).await;
        let err = client
            .update(&live(), "Patient", "123", json!({"resourceType": "Patient", "id": "456"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SmartError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_delete_and_operation_outcome_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/Patient/123"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/Patient/999"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "resourceType": "OperationOutcome",
                "issue": [{"severity": "error", "code": "not-found", "diagnostics": "Patient/999 not found"}]
            })))
            .mount(&server)
            .await;

        let (client, _) = client(&server).await;
        client.delete(&live(), "Patient", "123").await.unwrap();

        let err = client.delete(&live(), "Patient", "999").await.unwrap_err();
        match err {
            SmartError::Resource { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Patient/999 not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_passes_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Patient"))
            .and(query_param("name", "smith"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Bundle", "total": 1})),
            )
            .mount(&server)
            .await;

        let (client, audit) = client(&server).await;
        let bundle = client
            .search(&live(), "Patient", &[("name".to_string(), "smith".to_string())])
            .await
            .unwrap();
        assert_eq!(bundle["total"], 1);
        assert_eq!(audit.events()[0].action, AuditAction::Search);
    }
}
