//! # Cloud Template Lookup
//!
//! Resolves a label code through the vendor's template service.
//!
//! ## Exchange
//!
//! ```text
//! POST /api/template/getCloudTemplateByOneCode
//! niimbot-user-agent: AppVersionName/999.0.0
//! {"oneCode": "6972842743596"}
//!
//! 200 OK
//! {"code": 1, "message": "ok", "data": {"width": 30, "height": 15}}
//! ```
//!
//! `code == 1` is success; any other code is reported as not found with the
//! service's message.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::WidthResolver;
use crate::error::WidthError;

/// Production template endpoint
pub const DEFAULT_ENDPOINT: &str =
    "https://print.niimbot.com/api/template/getCloudTemplateByOneCode";

/// Header the service requires; any recent app version is accepted
const AGENT_HEADER: (&str, &str) = ("niimbot-user-agent", "AppVersionName/999.0.0");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateRequest<'a> {
    one_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TemplateResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<TemplateData>,
}

#[derive(Debug, Deserialize)]
struct TemplateData {
    width: u32,
}

/// HTTP width resolver backed by the vendor template service.
#[derive(Debug, Clone)]
pub struct CloudTemplateLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl CloudTemplateLookup {
    pub fn new() -> Result<Self, WidthError> {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Use a different service URL (tests, mirrors).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, WidthError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("labelwire/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WidthError::Lookup(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl WidthResolver for CloudTemplateLookup {
    async fn resolve_width(&self, code: &str) -> Result<u32, WidthError> {
        debug!(code, endpoint = %self.endpoint, "looking up label template");

        let response = self
            .client
            .post(&self.endpoint)
            .header(AGENT_HEADER.0, AGENT_HEADER.1)
            .json(&TemplateRequest { one_code: code })
            .send()
            .await
            .map_err(|e| WidthError::Lookup(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WidthError::Lookup(format!("HTTP error: {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| WidthError::Lookup(format!("failed to read response: {}", e)))?;
        parse_response(code, &body)
    }
}

/// Extract the width from a template service response body.
fn parse_response(code: &str, body: &[u8]) -> Result<u32, WidthError> {
    let parsed: TemplateResponse = serde_json::from_slice(body)
        .map_err(|e| WidthError::Lookup(format!("invalid response: {}", e)))?;

    if parsed.code != 1 {
        return Err(WidthError::NotFound(format!("{} ({})", code, parsed.message)));
    }
    match parsed.data {
        Some(data) if data.width > 0 => Ok(data.width),
        _ => Err(WidthError::NotFound(format!("{} (no template data)", code))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};

    #[test]
    fn test_parse_success() {
        let body = br#"{"code":1,"message":"ok","data":{"width":30,"height":15,"name":"x"}}"#;
        assert_eq!(parse_response("c", body), Ok(30));
    }

    #[test]
    fn test_parse_service_error() {
        let body = br#"{"code":-1,"message":"template not found","data":null}"#;
        assert_eq!(
            parse_response("c", body),
            Err(WidthError::NotFound("c (template not found)".to_string()))
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_response("c", b"<html>"),
            Err(WidthError::Lookup(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(TemplateRequest { one_code: "123" }).unwrap();
        assert_eq!(body, json!({"oneCode": "123"}));
    }

    /// Serve a fake template endpoint on an ephemeral port.
    async fn fake_service() -> String {
        async fn lookup(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
            let agent_ok = headers
                .get("niimbot-user-agent")
                .is_some_and(|v| v == "AppVersionName/999.0.0");
            match (agent_ok, body["oneCode"].as_str()) {
                (true, Some("6972842743596")) => {
                    Json(json!({"code": 1, "message": "ok", "data": {"width": 30, "height": 15}}))
                }
                _ => Json(json!({"code": 0, "message": "unknown", "data": null})),
            }
        }

        let app = Router::new().route("/template", post(lookup));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/template", addr)
    }

    #[tokio::test]
    async fn test_lookup_over_http() {
        let lookup = CloudTemplateLookup::with_endpoint(fake_service().await).unwrap();
        assert_eq!(lookup.resolve_width("6972842743596").await, Ok(30));
        assert!(matches!(
            lookup.resolve_width("0000").await,
            Err(WidthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_unreachable() {
        let lookup = CloudTemplateLookup::with_endpoint("http://127.0.0.1:9/none").unwrap();
        assert!(matches!(
            lookup.resolve_width("6972842743596").await,
            Err(WidthError::Lookup(_))
        ));
    }
}
