//! Promise-like tracking of one in-flight logical call.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::error::SyncError;

/// An in-flight logical call: its promise, its outcome and the remaining
/// retry budget for configured retryable failures.
///
/// The promise settles at most once. A cached delivery followed by a changed
/// network response leaves the promise holding the cached value.
#[derive(Debug)]
pub struct PendingCall {
  settle: Option<oneshot::Sender<Result<Value, SyncError>>>,
  outcome: Option<Result<Value, SyncError>>,
  retries_left: u32,
}

impl PendingCall {
  /// A pending call plus the promise its caller awaits.
  pub fn new(retry_budget: u32) -> (Self, CallPromise) {
    let (tx, rx) = oneshot::channel();
    let pending = Self {
      settle: Some(tx),
      outcome: None,
      retries_left: retry_budget,
    };
    (pending, CallPromise { rx })
  }

  /// A pending call nobody awaits; the outcome is still recorded.
  pub fn detached(retry_budget: u32) -> Self {
    Self {
      settle: None,
      outcome: None,
      retries_left: retry_budget,
    }
  }

  pub fn retries_left(&self) -> u32 {
    self.retries_left
  }

  pub fn is_settled(&self) -> bool {
    self.outcome.is_some()
  }

  pub fn outcome(&self) -> Option<&Result<Value, SyncError>> {
    self.outcome.as_ref()
  }

  /// Spend one retry if any remain.
  pub(crate) fn take_retry(&mut self) -> bool {
    if self.retries_left == 0 {
      return false;
    }
    self.retries_left -= 1;
    true
  }

  pub(crate) fn resolve(&mut self, value: Value) -> bool {
    self.settle_with(Ok(value))
  }

  pub(crate) fn reject(&mut self, error: SyncError) -> bool {
    self.settle_with(Err(error))
  }

  fn settle_with(&mut self, result: Result<Value, SyncError>) -> bool {
    if self.outcome.is_some() {
      return false;
    }
    if let Some(tx) = self.settle.take() {
      // Receiver may have been dropped; the outcome is still recorded
      let _ = tx.send(result.clone());
    }
    self.outcome = Some(result);
    true
  }

  pub(crate) fn into_outcome(self) -> Result<Value, SyncError> {
    self.outcome.unwrap_or(Err(SyncError::Abandoned))
  }
}

/// Resolves with the first settlement of its [`PendingCall`].
#[derive(Debug)]
pub struct CallPromise {
  rx: oneshot::Receiver<Result<Value, SyncError>>,
}

impl Future for CallPromise {
  type Output = Result<Value, SyncError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.rx)
      .poll(cx)
      .map(|result| result.unwrap_or(Err(SyncError::Abandoned)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_first_settlement_wins() {
    let (mut pending, promise) = PendingCall::new(0);
    assert!(pending.resolve(json!(1)));
    assert!(!pending.resolve(json!(2)));
    assert!(!pending.reject(SyncError::Abandoned));

    assert_eq!(promise.await, Ok(json!(1)));
    assert_eq!(pending.into_outcome(), Ok(json!(1)));
  }

  #[tokio::test]
  async fn test_dropped_call_abandons_promise() {
    let (pending, promise) = PendingCall::new(0);
    drop(pending);
    assert_eq!(promise.await, Err(SyncError::Abandoned));
  }

  #[test]
  fn test_retry_budget() {
    let mut pending = PendingCall::detached(2);
    assert!(pending.take_retry());
    assert!(pending.take_retry());
    assert!(!pending.take_retry());
    assert_eq!(pending.retries_left(), 0);
    assert!(!pending.is_settled());
  }
}
