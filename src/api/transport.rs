//! HTTP transport seam and its reqwest implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use super::request::HttpMethod;

/// A fully built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: HttpMethod,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
  pub timeout: Duration,
  pub validate_tls: bool,
}

impl HttpRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response of any status. Header names are lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: String,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// `max-age` from the `Cache-Control` header.
  pub fn max_age(&self) -> Option<Duration> {
    self
      .header("cache-control")?
      .split(',')
      .filter_map(|directive| directive.trim().strip_prefix("max-age="))
      .find_map(|secs| secs.trim().parse::<u64>().ok())
      .map(Duration::from_secs)
  }
}

/// Failures below HTTP: nothing came back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  #[error("request timed out: {0}")]
  Timeout(String),

  #[error("connection failed: {0}")]
  Connect(String),

  #[error("{0}")]
  Other(String),
}

impl TransportError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, Self::Timeout(_))
  }
}

/// Sends requests. Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest`.
pub struct ReqwestTransport {
  client: reqwest::Client,
  /// Built on first use by a request that disables TLS validation
  insecure: OnceLock<reqwest::Client>,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      insecure: OnceLock::new(),
    })
  }

  fn client_for(&self, request: &HttpRequest) -> Result<&reqwest::Client, TransportError> {
    if request.validate_tls {
      return Ok(&self.client);
    }

    if let Some(client) = self.insecure.get() {
      return Ok(client);
    }

    let client = reqwest::Client::builder()
      .danger_accept_invalid_certs(true)
      .build()
      .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;
    Ok(self.insecure.get_or_init(|| client))
  }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
  match method {
    HttpMethod::Get => reqwest::Method::GET,
    HttpMethod::Post => reqwest::Method::POST,
    HttpMethod::Put => reqwest::Method::PUT,
    HttpMethod::Patch => reqwest::Method::PATCH,
    HttpMethod::Delete => reqwest::Method::DELETE,
  }
}

fn classify(error: &reqwest::Error) -> TransportError {
  if error.is_timeout() {
    TransportError::Timeout(error.to_string())
  } else if error.is_connect() {
    TransportError::Connect(error.to_string())
  } else {
    TransportError::Other(error.to_string())
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let client = self.client_for(request)?;

    let mut builder = client
      .request(to_reqwest_method(request.method), &request.url)
      .timeout(request.timeout);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| classify(&e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();
    let body = response.text().await.map_err(|e| classify(&e))?;

    tracing::trace!(url = %request.url, status, "HTTP response");

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_headers_are_case_insensitive() {
    let response = HttpResponse::new(200, "{}").with_header("ETag", "\"abc\"");
    assert_eq!(response.header("etag"), Some("\"abc\""));
    assert_eq!(response.header("ETAG"), Some("\"abc\""));
    assert!(response.is_success());
  }

  #[test]
  fn test_max_age() {
    let response = HttpResponse::new(200, "").with_header("Cache-Control", "public, max-age=900");
    assert_eq!(response.max_age(), Some(Duration::from_secs(900)));

    let response = HttpResponse::new(200, "").with_header("Cache-Control", "no-store");
    assert_eq!(response.max_age(), None);
    assert_eq!(HttpResponse::new(200, "").max_age(), None);
  }

  #[test]
  fn test_request_header_lookup() {
    let request = HttpRequest {
      method: HttpMethod::Get,
      url: "https://shop.test".to_string(),
      headers: vec![("Authorization".to_string(), "Bearer x".to_string())],
      body: None,
      timeout: Duration::from_secs(1),
      validate_tls: true,
    };
    assert_eq!(request.header("authorization"), Some("Bearer x"));
    assert!(request.header("etag").is_none());
  }
}
