//! Decomposing collection responses into members and recombining them.
//!
//! Collection responses look like `{"count":2,"data":[{..},{..}],"total":2}`.
//! Members are cached individually and put back together in the order the
//! ids were requested.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::cache::{BatchLookup, CollectionMember};

/// Split a collection response body into its members.
///
/// Members without a usable `id_field` are skipped; a body without a
/// `data` array has no members.
pub fn decode_members(
  body: &str,
  id_field: &str,
) -> Result<Vec<CollectionMember>, serde_json::Error> {
  let value: Value = serde_json::from_str(body)?;
  let Some(data) = value.get("data").and_then(Value::as_array) else {
    return Ok(Vec::new());
  };

  let mut members = Vec::with_capacity(data.len());
  for item in data {
    let id = match item.get(id_field) {
      Some(Value::String(id)) => id.clone(),
      Some(Value::Number(id)) => id.to_string(),
      _ => continue,
    };
    members.push(CollectionMember {
      id,
      payload: serde_json::to_string(item)?,
    });
  }

  Ok(members)
}

/// Merge cached and freshly fetched members back into requested order.
///
/// `envelope` supplies any top-level fields of the fresh response; its
/// `data`, `count` and `total` are replaced. An id requested twice appears
/// twice. Ids found in neither source are left out.
pub fn recombine(
  lookup: &BatchLookup,
  fresh: &[CollectionMember],
  envelope: Option<&Value>,
) -> Value {
  let mut by_id: HashMap<&str, Value> = HashMap::new();

  for hit in &lookup.matches {
    match serde_json::from_str(&hit.entry.payload) {
      Ok(value) => {
        by_id.insert(hit.id.as_str(), value);
      }
      Err(e) => tracing::warn!(id = %hit.id, error = %e, "Skipping unreadable cached member"),
    }
  }
  for member in fresh {
    if let Ok(value) = serde_json::from_str(&member.payload) {
      by_id.insert(member.id.as_str(), value);
    }
  }

  let data: Vec<Value> = lookup
    .ordered_ids
    .iter()
    .filter_map(|id| by_id.get(id.as_str()).cloned())
    .collect();

  let mut out = match envelope {
    Some(Value::Object(map)) => map.clone(),
    _ => Map::new(),
  };
  out.insert("count".to_string(), Value::from(data.len()));
  out.insert("total".to_string(), Value::from(data.len()));
  out.insert("data".to_string(), Value::Array(data));
  Value::Object(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{BatchHit, CacheEntry};
  use chrono::Utc;
  use serde_json::json;

  fn hit(id: &str) -> BatchHit {
    BatchHit {
      id: id.to_string(),
      entry: CacheEntry {
        url_hash: String::new(),
        entity_type: "product".to_string(),
        collection_type: "products".to_string(),
        url: String::new(),
        payload: format!(r#"{{"id":"{}","from":"cache"}}"#, id),
        expiry: Utc::now(),
        version: 1,
        frequency: 1,
        checksum: String::new(),
      },
    }
  }

  fn lookup(hits: &[&str], misses: &[&str], ordered: &[&str]) -> BatchLookup {
    BatchLookup {
      matches: hits.iter().map(|id| hit(id)).collect(),
      misses: misses.iter().map(|s| s.to_string()).collect(),
      missed_url: String::new(),
      ordered_ids: ordered.iter().map(|s| s.to_string()).collect(),
    }
  }

  #[test]
  fn test_decode_members() {
    let members = decode_members(
      r#"{"_type":"product_result","count":2,"data":[{"id":"A","n":1},{"id":7},{"name":"no id"}]}"#,
      "id",
    )
    .unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].id, "A");
    assert_eq!(members[0].payload, r#"{"id":"A","n":1}"#);
    assert_eq!(members[1].id, "7");
  }

  #[test]
  fn test_decode_without_data() {
    assert!(decode_members(r#"{"id":"A"}"#, "id").unwrap().is_empty());
    assert!(decode_members("not json", "id").is_err());
  }

  #[test]
  fn test_recombine_preserves_requested_order() {
    let fresh = vec![CollectionMember {
      id: "B".to_string(),
      payload: r#"{"id":"B","from":"network"}"#.to_string(),
    }];
    let envelope = json!({"_type": "product_result", "count": 1, "data": []});

    let combined = recombine(&lookup(&["A", "C"], &["B"], &["A", "B", "C"]), &fresh, Some(&envelope));

    let ids: Vec<&str> = combined["data"]
      .as_array()
      .unwrap()
      .iter()
      .map(|m| m["id"].as_str().unwrap())
      .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(combined["data"][1]["from"], "network");
    assert_eq!(combined["count"], 3);
    assert_eq!(combined["total"], 3);
    assert_eq!(combined["_type"], "product_result");
  }

  #[test]
  fn test_recombine_from_cache_only() {
    let combined = recombine(&lookup(&["B", "A"], &[], &["B", "A"]), &[], None);
    assert_eq!(
      combined,
      json!({"count": 2, "total": 2, "data": [
        {"id": "B", "from": "cache"},
        {"id": "A", "from": "cache"}
      ]})
    );
  }

  #[test]
  fn test_recombine_keeps_repeated_ids() {
    let fresh = vec![CollectionMember {
      id: "B".to_string(),
      payload: r#"{"id":"B"}"#.to_string(),
    }];
    let combined = recombine(&lookup(&["A", "A"], &["B"], &["A", "B", "A"]), &fresh, None);

    let ids: Vec<&str> = combined["data"]
      .as_array()
      .unwrap()
      .iter()
      .map(|m| m["id"].as_str().unwrap())
      .collect();
    assert_eq!(ids, vec!["A", "B", "A"]);
    assert_eq!(combined["count"], 3);
    assert_eq!(combined["total"], 3);
  }

  #[test]
  fn test_recombine_drops_ids_the_server_did_not_return() {
    let combined = recombine(&lookup(&["A"], &["Z"], &["A", "Z"]), &[], None);
    assert_eq!(combined["count"], 1);
  }
}
