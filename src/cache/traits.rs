//! Core types for the response cache.

use chrono::{DateTime, Utc};
use url::form_urlencoded;

/// One cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Digest of the canonical URL the entry was stored under
  pub url_hash: String,
  pub entity_type: String,
  pub collection_type: String,
  pub url: String,
  /// Raw serialized response body for a single entity
  pub payload: String,
  /// Hint only; single-entity reads are always revalidated
  pub expiry: DateTime<Utc>,
  pub version: i64,
  pub frequency: i64,
  pub checksum: String,
}

/// Bookkeeping labels and expiry written alongside a payload.
#[derive(Debug, Clone)]
pub struct EntryMeta {
  pub entity_type: String,
  pub collection_type: String,
  pub expiry: DateTime<Utc>,
}

/// A single-entity write.
#[derive(Debug, Clone, Copy)]
pub struct EntryWrite<'a> {
  pub url_hash: &'a str,
  pub url: &'a str,
  pub payload: &'a str,
  pub checksum: &'a str,
  pub meta: &'a EntryMeta,
}

/// One member of a decoded collection response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMember {
  pub id: String,
  /// The member serialized on its own
  pub payload: String,
}

/// Percent-encode an entity id for the URL path.
///
/// Everything but ASCII alphanumerics and `*-._` is escaped, so an id can
/// never open a query, split a batch list or look like one.
pub fn encode_id(id: &str) -> String {
  form_urlencoded::byte_serialize(id.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
}

fn decode_id(segment: &str) -> String {
  form_urlencoded::parse(segment.as_bytes())
    .next()
    .map(|(id, _)| id.into_owned())
    .unwrap_or_default()
}

/// A URL of the shape `base(id1,id2,...)query`, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUrl {
  /// Everything before the opening parenthesis, e.g. `https://host/.../products/`
  pub base: String,
  /// Decoded ids, in request order
  pub ids: Vec<String>,
  /// `?` plus the query string, or empty
  pub query_suffix: String,
}

impl BatchUrl {
  /// Split `url` if its path ends in a parenthesized id list.
  pub fn parse(url: &str) -> Option<Self> {
    let (path, query_suffix) = match url.find('?') {
      Some(pos) => (&url[..pos], &url[pos..]),
      None => (url, ""),
    };

    let inner_end = path.strip_suffix(')')?;
    let open = inner_end.rfind('(')?;
    let ids: Vec<String> = inner_end[open + 1..]
      .split(',')
      .map(str::trim)
      .filter(|id| !id.is_empty())
      .map(decode_id)
      .collect();

    if ids.is_empty() {
      return None;
    }

    Some(Self {
      base: inner_end[..open].to_string(),
      ids,
      query_suffix: query_suffix.to_string(),
    })
  }

  /// Single-entity URL for one member of the batch.
  pub fn member_url(&self, id: &str) -> String {
    format!("{}{}{}", self.base, encode_id(id), self.query_suffix)
  }

  /// Batch URL addressing only `ids`.
  pub fn url_for(&self, ids: &[String]) -> String {
    let encoded: Vec<String> = ids.iter().map(|id| encode_id(id)).collect();
    format!("{}({}){}", self.base, encoded.join(","), self.query_suffix)
  }

  /// The full URL this batch was parsed from.
  pub fn url(&self) -> String {
    self.url_for(&self.ids)
  }
}

/// A batch member found in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHit {
  pub id: String,
  pub entry: CacheEntry,
}

/// Result of splitting a batch request into cached and missing members.
#[derive(Debug, Clone)]
pub struct BatchLookup {
  /// Cached members, in requested order
  pub matches: Vec<BatchHit>,
  /// Ids not in the cache, in requested order
  pub misses: Vec<String>,
  /// URL requesting only the misses
  pub missed_url: String,
  /// The ids as originally requested
  pub ordered_ids: Vec<String>,
}

impl BatchLookup {
  /// Every requested member is cached; no network call is needed.
  pub fn is_complete(&self) -> bool {
    self.misses.is_empty()
  }
}

/// Aggregate statistics about the cache table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: u64,
  pub total_frequency: i64,
  pub schema_version: Option<i64>,
  /// Entry count per entity type, sorted by type
  pub by_entity_type: Vec<(String, u64)>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_batch_url() {
    let batch =
      BatchUrl::parse("https://shop.test/dw/shop/v1/products/(A,B,C)?locale=en").unwrap();
    assert_eq!(batch.base, "https://shop.test/dw/shop/v1/products/");
    assert_eq!(batch.ids, vec!["A", "B", "C"]);
    assert_eq!(batch.query_suffix, "?locale=en");
    assert_eq!(
      batch.member_url("B"),
      "https://shop.test/dw/shop/v1/products/B?locale=en"
    );
  }

  #[test]
  fn test_parse_without_query() {
    let batch = BatchUrl::parse("https://shop.test/products/(A, B)").unwrap();
    assert_eq!(batch.ids, vec!["A", "B"]);
    assert_eq!(batch.query_suffix, "");
    assert_eq!(batch.url(), "https://shop.test/products/(A,B)");
  }

  #[test]
  fn test_single_entity_url_is_not_a_batch() {
    assert!(BatchUrl::parse("https://shop.test/products/A?locale=en").is_none());
    assert!(BatchUrl::parse("https://shop.test/products/()").is_none());
  }

  #[test]
  fn test_encoded_ids_round_trip_through_parse() {
    let batch = BatchUrl::parse("https://shop.test/products/(a%2Cb,shirt%28red%29,x%20y)").unwrap();
    assert_eq!(batch.ids, vec!["a,b", "shirt(red)", "x y"]);
    assert_eq!(batch.member_url("a,b"), "https://shop.test/products/a%2Cb");
    assert_eq!(
      batch.url(),
      "https://shop.test/products/(a%2Cb,shirt%28red%29,x%20y)"
    );
  }

  #[test]
  fn test_encode_id() {
    assert_eq!(encode_id("A-1_b.c"), "A-1_b.c");
    assert_eq!(encode_id("a?b&c"), "a%3Fb%26c");
    assert_eq!(encode_id("c/d"), "c%2Fd");
    assert_eq!(encode_id("1+1 2"), "1%2B1%202");
  }

  #[test]
  fn test_url_for_subset() {
    let batch = BatchUrl::parse("https://shop.test/products/(A,B,C)?q=1").unwrap();
    assert_eq!(
      batch.url_for(&["C".to_string()]),
      "https://shop.test/products/(C)?q=1"
    );
  }
}
