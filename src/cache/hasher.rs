//! Content digests for cache keys and change detection.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes.as_ref());
  hex::encode(hasher.finalize())
}

/// Cache primary key for a canonical request URL.
pub fn url_hash(url: &str) -> String {
  digest(url)
}

/// Digest of a raw response body.
pub fn checksum(payload: &str) -> String {
  digest(payload)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_digest_is_stable() {
    assert_eq!(
      digest("abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(url_hash("https://x/a"), url_hash("https://x/a"));
  }

  #[test]
  fn test_different_payloads_differ() {
    assert_ne!(checksum(r#"{"id":"A"}"#), checksum(r#"{"id":"B"}"#));
  }
}
