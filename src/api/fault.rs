//! Structured error payloads returned by the commerce API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fault document, e.g.
/// `{"_v":"20.4","fault":{"type":"InvalidAccessTokenException","message":"..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
  #[serde(rename = "type")]
  pub fault_type: String,
  #[serde(default)]
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FaultEnvelope {
  fault: Fault,
}

impl Fault {
  /// Parse a fault from an error response body.
  pub fn parse(body: &str) -> Option<Self> {
    serde_json::from_str::<FaultEnvelope>(body)
      .ok()
      .map(|envelope| envelope.fault)
  }
}

/// Whatever JSON object an error body carries, for applying to a model.
pub fn partial_data(body: &str) -> Option<Value> {
  match serde_json::from_str::<Value>(body) {
    Ok(value @ Value::Object(_)) => Some(value),
    _ => None,
  }
}
