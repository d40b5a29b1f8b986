//! Model and collection handles the sync layer reads into.

mod accessors;
pub mod catalog;
mod json;

pub use json::JsonModel;

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// The contract a model or collection offers to [`crate::SyncOrchestrator`].
///
/// Only `name`, `to_json` and the mutation hooks are required; everything
/// else has a conservative default (not cached, not secure, no overrides).
pub trait SyncModel: Send {
  /// Name used in diagnostics, e.g. `product`
  fn name(&self) -> &str;

  /// Label stored with cache entries
  fn entity_type(&self) -> &str {
    self.name()
  }

  /// Label stored with cache entries written from collection responses
  fn collection_type(&self) -> &str {
    ""
  }

  /// Responses for this model may be served from the cache
  fn cache_eligible(&self) -> bool {
    false
  }

  /// Secure models are never cached regardless of eligibility
  fn is_secure(&self) -> bool {
    false
  }

  /// Per-call request timeout
  fn timeout(&self) -> Option<Duration> {
    None
  }

  /// Per-call TLS validation override
  fn validate_tls(&self) -> Option<bool> {
    None
  }

  /// Query parameters this model adds to every request, e.g. `expand`
  fn query_params(&self) -> BTreeMap<String, String> {
    BTreeMap::new()
  }

  /// Field identifying members of a collection response
  fn id_field(&self) -> &str {
    "id"
  }

  /// Request body for non-GET calls
  fn to_json(&self) -> Value;

  fn clear(&mut self, silent: bool);

  /// Merge `attributes` into the model.
  fn set(&mut self, attributes: &Value, silent: bool);

  /// Replace a collection's contents with `response`.
  fn reset(&mut self, response: &Value);

  /// Shape a fresh response before it is applied.
  fn normalize(&self, response: Value) -> Value {
    response
  }

  fn set_etag(&mut self, _etag: &str) {}

  fn set_auth_token(&mut self, _token: &str) {}
}
