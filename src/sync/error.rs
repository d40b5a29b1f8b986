//! Errors surfaced to callers of the sync layer.

use crate::api::Fault;

/// Terminal failure of a logical call.
///
/// Retryable and token-expiry failures are recovered internally and never
/// reach the caller as a `SyncError`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
  /// No HTTP response was received
  #[error("{model} request to {url} failed: {message}")]
  Transport {
    url: String,
    model: String,
    message: String,
    timeout: bool,
  },

  /// The server answered with a non-2xx status
  #[error("{model} request to {url} failed with status {status}")]
  Http {
    url: String,
    status: u16,
    model: String,
    /// Raw response body
    body: String,
    fault: Option<Fault>,
  },

  #[error("failed to decode {model} response from {url}: {message}")]
  Decode {
    url: String,
    model: String,
    message: String,
  },

  #[error("token refresh failed: {0}")]
  TokenRefresh(String),

  /// The call finished without settling its promise
  #[error("call ended without a result")]
  Abandoned,
}

impl SyncError {
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn fault(&self) -> Option<&Fault> {
    match self {
      Self::Http { fault, .. } => fault.as_ref(),
      _ => None,
    }
  }

  /// Multi-line context for the error reporter.
  pub fn diagnostic(&self) -> String {
    match self {
      Self::Http {
        url,
        status,
        model,
        body,
        fault,
      } => {
        let fault = fault
          .as_ref()
          .map(|f| format!("{}: {}", f.fault_type, f.message))
          .unwrap_or_else(|| "unparsed".to_string());
        format!("model: {model}\nurl: {url}\nstatus: {status}\nfault: {fault}\nbody: {body}")
      }
      other => other.to_string(),
    }
  }
}
