//! Collaborators the orchestrator hands work to: token refresh, error
//! reporting, user notification and session bookkeeping.

use async_trait::async_trait;
use std::time::Duration;

use super::error::SyncError;

/// Obtains a fresh bearer token after the API rejects the current one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
  /// Returns the new `Authorization` header value.
  async fn refresh(&self, host: &str, current: Option<&str>) -> Result<String, SyncError>;
}

/// Refresher for deployments without token auth; always fails.
pub struct NoTokenRefresh;

#[async_trait]
impl TokenRefresher for NoTokenRefresh {
  async fn refresh(&self, _host: &str, _current: Option<&str>) -> Result<String, SyncError> {
    Err(SyncError::TokenRefresh(
      "no token refresher configured".to_string(),
    ))
  }
}

/// Refreshes a shopper token through the `customers/auth` resource.
pub struct CustomerAuthRefresher {
  http: reqwest::Client,
  client_id: String,
}

impl CustomerAuthRefresher {
  pub fn new(client_id: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::TokenRefresh(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      client_id: client_id.into(),
    })
  }

  fn auth_url(&self, host: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
      .append_pair("client_id", &self.client_id)
      .finish();
    format!("{}/customers/auth?{}", host.trim_end_matches('/'), query)
  }
}

#[async_trait]
impl TokenRefresher for CustomerAuthRefresher {
  async fn refresh(&self, host: &str, current: Option<&str>) -> Result<String, SyncError> {
    let url = self.auth_url(host);
    // A token we can't refresh gets exchanged for a guest token
    let grant = if current.is_some() { "refresh" } else { "guest" };

    let mut request = self
      .http
      .post(&url)
      .header("content-type", "application/json")
      .body(format!(r#"{{"type":"{}"}}"#, grant));
    if let Some(token) = current {
      request = request.header("authorization", token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| SyncError::TokenRefresh(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
      return Err(SyncError::TokenRefresh(format!(
        "{} returned status {}",
        url,
        response.status()
      )));
    }

    response
      .headers()
      .get("authorization")
      .and_then(|v| v.to_str().ok())
      .map(String::from)
      .ok_or_else(|| SyncError::TokenRefresh(format!("{} returned no Authorization header", url)))
  }
}

/// Receives diagnostics for terminal faults. Fire-and-forget.
pub trait ErrorReporter: Send + Sync {
  fn report(&self, diagnostic: &str);
}

/// Reports through the `tracing` error level.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
  fn report(&self, diagnostic: &str) {
    tracing::error!(target: "storesync::report", "{}", diagnostic);
  }
}

/// Surfaces a short user-facing message.
pub trait Notifier: Send + Sync {
  fn notify(&self, message: &str, persistent: bool);
}

/// Notifier that only logs.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, message: &str, persistent: bool) {
    tracing::warn!(persistent, "{}", message);
  }
}

/// Told once per logical call so session keepalive can be extended.
pub trait SessionListener: Send + Sync {
  fn session_renewed(&self);
}

pub struct NoopSession;

impl SessionListener for NoopSession {
  fn session_renewed(&self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_auth_url_encodes_client_id() {
    let refresher = CustomerAuthRefresher::new("a&b c", Duration::from_secs(1)).unwrap();
    assert_eq!(
      refresher.auth_url("https://shop.test/api/"),
      "https://shop.test/api/customers/auth?client_id=a%26b+c"
    );
  }

  #[tokio::test]
  async fn test_no_token_refresh_fails() {
    let err = NoTokenRefresh.refresh("https://shop.test", None).await.unwrap_err();
    assert!(matches!(err, SyncError::TokenRefresh(_)));
  }
}
