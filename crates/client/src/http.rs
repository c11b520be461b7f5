//! reqwest-backed [`ApiTransport`] for the portal REST API.

use std::time::Duration;

use async_trait::async_trait;
use portal_core::config::ApiConfig;
use portal_core::{PortalError, PortalResult, TenantCode};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::transport::{ApiTransport, Method};

/// Header carrying the active platform (tenant) code.
pub const TENANT_HEADER: &str = "x-platform-code";

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "msg", alias = "error")]
    message: String,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> PortalResult<Self> {
        let parsed = Url::parse(&config.base_url).map_err(|e| {
            PortalError::Config(format!("invalid api.base_url '{}': {e}", config.base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PortalError::Config(format!(
                "api.base_url must be http(s), got '{}'",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| PortalError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: build_auth_headers(config.auth_token.as_deref())?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        tenant: Option<&TenantCode>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, self.url(path))
            .headers(self.auth_header.clone());
        if let Some(tenant) = tenant {
            request = request.header(TENANT_HEADER, tenant.as_str());
        }
        request
    }

    async fn parse_response(response: reqwest::Response) -> PortalResult<Value> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }
        Err(PortalError::Http {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn get(
        &self,
        path: &str,
        query: Option<&Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Value> {
        let mut request = self.request(reqwest::Method::GET, path, tenant);
        if let Some(query) = query.filter(|q| !q.is_null()) {
            request = request.query(query);
        }
        debug!(path = path, "GET");
        let response = request.send().await.map_err(transport_error)?;
        Self::parse_response(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        tenant: Option<&TenantCode>,
    ) -> PortalResult<Value> {
        let mut request = self.request(to_reqwest(method), path, tenant);
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!(method = method.as_str(), path = path, "Sending mutation");
        let response = request.send().await.map_err(transport_error)?;
        Self::parse_response(response).await
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn transport_error(err: reqwest::Error) -> PortalError {
    PortalError::Transport(err.to_string())
}

/// Prefer the backend's `message` field; fall back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.trim().to_string(),
    }
}

fn build_auth_headers(token: Option<&str>) -> PortalResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| PortalError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new(&config("http://bi.local/api/")).unwrap();
        assert_eq!(transport.base_url(), "http://bi.local/api");
        assert_eq!(transport.url("/stations"), "http://bi.local/api/stations");
        assert_eq!(transport.url("stations/4"), "http://bi.local/api/stations/4");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            HttpTransport::new(&config("not a url")),
            Err(PortalError::Config(_))
        ));
        assert!(matches!(
            HttpTransport::new(&config("ftp://bi.local")),
            Err(PortalError::Config(_))
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"station not found"}"#), "station not found");
        assert_eq!(error_message(r#"{"msg":"token expired"}"#), "token expired");
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_auth_header() {
        let headers = build_auth_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(build_auth_headers(Some("")).unwrap().is_empty());
        assert!(build_auth_headers(None).unwrap().is_empty());
    }
}
