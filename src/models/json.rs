use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::SyncModel;

/// Top-level response fields that carry API bookkeeping rather than data.
const META_FIELDS: &[&str] = &["_v", "_type"];

/// A model backed by a JSON object.
///
/// Single-entity responses are merged into `attributes`; collection
/// responses replace `items` with the response's `data` array.
#[derive(Debug, Clone, Default)]
pub struct JsonModel {
  name: String,
  collection_type: String,
  attributes: Map<String, Value>,
  items: Vec<Value>,
  etag: Option<String>,
  auth_token: Option<String>,
  cache_eligible: bool,
  secure: bool,
  timeout: Option<Duration>,
  validate_tls: Option<bool>,
  query_params: BTreeMap<String, String>,
  /// Number of non-silent mutations
  changes: u64,
}

impl JsonModel {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn with_collection_type(mut self, collection_type: impl Into<String>) -> Self {
    self.collection_type = collection_type.into();
    self
  }

  /// Allow responses for this model to be cached.
  pub fn cached(mut self) -> Self {
    self.cache_eligible = true;
    self
  }

  /// Mark the model as carrying sensitive data; it is never cached.
  pub fn secure(mut self) -> Self {
    self.secure = true;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_tls_validation(mut self, validate: bool) -> Self {
    self.validate_tls = Some(validate);
    self
  }

  pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.query_params.insert(key.into(), value.into());
    self
  }

  pub fn attributes(&self) -> &Map<String, Value> {
    &self.attributes
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.attributes.get(key)
  }

  /// Deserialize one attribute.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self
      .attributes
      .get(key)
      .and_then(|v| serde_json::from_value(v.clone()).ok())
  }

  pub fn has(&self, key: &str) -> bool {
    self.attributes.get(key).is_some_and(|v| !v.is_null())
  }

  pub fn set_field<T: Serialize>(&mut self, key: &str, value: T) {
    if let Ok(value) = serde_json::to_value(value) {
      self.attributes.insert(key.to_string(), value);
      self.changes += 1;
    }
  }

  pub fn items(&self) -> &[Value] {
    &self.items
  }

  pub fn etag(&self) -> Option<&str> {
    self.etag.as_deref()
  }

  pub fn auth_token(&self) -> Option<&str> {
    self.auth_token.as_deref()
  }

  pub fn change_count(&self) -> u64 {
    self.changes
  }
}

impl SyncModel for JsonModel {
  fn name(&self) -> &str {
    &self.name
  }

  fn collection_type(&self) -> &str {
    &self.collection_type
  }

  fn cache_eligible(&self) -> bool {
    self.cache_eligible
  }

  fn is_secure(&self) -> bool {
    self.secure
  }

  fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  fn validate_tls(&self) -> Option<bool> {
    self.validate_tls
  }

  fn query_params(&self) -> BTreeMap<String, String> {
    self.query_params.clone()
  }

  fn to_json(&self) -> Value {
    Value::Object(self.attributes.clone())
  }

  fn clear(&mut self, silent: bool) {
    self.attributes.clear();
    self.items.clear();
    if !silent {
      self.changes += 1;
    }
  }

  fn set(&mut self, attributes: &Value, silent: bool) {
    let Value::Object(map) = attributes else {
      return;
    };

    let mut changed = false;
    for (key, value) in map {
      if self.attributes.get(key) != Some(value) {
        self.attributes.insert(key.clone(), value.clone());
        changed = true;
      }
    }
    if changed && !silent {
      self.changes += 1;
    }
  }

  fn reset(&mut self, response: &Value) {
    self.items = match response.get("data") {
      Some(Value::Array(items)) => items.clone(),
      _ => Vec::new(),
    };
    self.attributes = match response {
      Value::Object(map) => map
        .iter()
        .filter(|(key, _)| key.as_str() != "data")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
      _ => Map::new(),
    };
    self.changes += 1;
  }

  fn normalize(&self, response: Value) -> Value {
    match response {
      Value::Object(mut map) => {
        for field in META_FIELDS {
          map.remove(*field);
        }
        Value::Object(map)
      }
      other => other,
    }
  }

  fn set_etag(&mut self, etag: &str) {
    self.etag = Some(etag.to_string());
  }

  fn set_auth_token(&mut self, token: &str) {
    self.auth_token = Some(token.to_string());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_set_merges_and_counts_changes() {
    let mut model = JsonModel::new("product");
    model.set(&json!({"id": "A", "name": "Shirt"}), false);
    model.set(&json!({"name": "Shirt"}), false);
    model.set(&json!({"price": 10}), true);

    assert_eq!(model.get("name"), Some(&json!("Shirt")));
    assert_eq!(model.get_as::<i64>("price"), Some(10));
    assert_eq!(model.change_count(), 1);
  }

  #[test]
  fn test_reset_replaces_items() {
    let mut model = JsonModel::new("product").with_collection_type("products");
    model.reset(&json!({"count": 2, "data": [{"id": "A"}, {"id": "B"}]}));
    assert_eq!(model.items().len(), 2);
    assert_eq!(model.get("count"), Some(&json!(2)));
    assert!(model.get("data").is_none());

    model.clear(true);
    assert!(model.items().is_empty());
    assert_eq!(model.change_count(), 1);
  }

  #[test]
  fn test_normalize_strips_meta_fields() {
    let model = JsonModel::new("product");
    let normalized = model.normalize(json!({"_v": "20.4", "_type": "product", "id": "A"}));
    assert_eq!(normalized, json!({"id": "A"}));
  }

  #[test]
  fn test_has_ignores_null() {
    let mut model = JsonModel::new("product");
    model.set(&json!({"a": null, "b": 1}), true);
    assert!(!model.has("a"));
    assert!(model.has("b"));
    assert!(!model.has("c"));
  }

  #[test]
  fn test_defaults_are_not_cached() {
    let model = JsonModel::new("basket");
    assert!(!model.cache_eligible());
    assert!(JsonModel::new("product").cached().cache_eligible());
    assert!(JsonModel::new("customer").cached().secure().is_secure());
  }
}
