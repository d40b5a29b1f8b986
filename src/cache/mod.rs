//! Persistent response cache.
//!
//! Entries are keyed by the digest of the canonical single-entity URL:
//! - Single-entity lookups are point reads by `url_hash`
//! - Batch lookups split a `resource(id1,id2,...)` URL into hits and misses
//! - Collection responses are always stored one row per member
//! - `version` only moves when the payload checksum changes

mod hasher;
mod storage;
mod traits;

pub use hasher::{checksum, digest, url_hash};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{
  encode_id, BatchHit, BatchLookup, BatchUrl, CacheEntry, CacheStats, CollectionMember,
  EntryMeta, EntryWrite,
};
