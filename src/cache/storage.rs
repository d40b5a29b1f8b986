//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::hasher::{checksum, url_hash};
use super::traits::{
  BatchHit, BatchLookup, BatchUrl, CacheEntry, CacheStats, CollectionMember, EntryMeta,
  EntryWrite,
};
use crate::db;

/// Trait for cache storage backends.
///
/// All operations are synchronous. Callers treat an `Err` as a cache miss
/// for that one operation.
pub trait CacheStorage: Send + Sync {
  /// Drop and recreate the cache table if the persisted schema version is
  /// absent or older than `expected_version`. Returns true if it did.
  fn initialize_schema(&self, expected_version: i64) -> Result<bool>;

  /// Point lookup by URL digest.
  fn get_single(&self, url_hash: &str) -> Result<Option<CacheEntry>>;

  /// Split a batch into cached members and misses, preserving order.
  fn get_batch(&self, batch: &BatchUrl) -> Result<BatchLookup>;

  /// Bump `frequency` and `expiry` without touching the payload.
  fn touch(&self, url_hash: &str, expiry: DateTime<Utc>) -> Result<()>;

  /// Replace the row for `write.url_hash` with `version + 1`, `frequency + 1`.
  fn upsert_single(&self, write: EntryWrite<'_>) -> Result<()>;

  /// Store each collection member under its own single-entity URL.
  /// Returns the number of members whose content changed or was new.
  fn upsert_batch(
    &self,
    batch: &BatchUrl,
    members: &[CollectionMember],
    meta: &EntryMeta,
  ) -> Result<usize>;

  /// Remove one entry.
  fn remove(&self, url_hash: &str) -> Result<bool>;

  /// Drop and recreate the cache table unconditionally.
  fn reset(&self) -> Result<()>;

  fn stats(&self) -> Result<CacheStats>;
}

/// Storage implementation that doesn't cache anything.
/// Used when the proxy cache is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn initialize_schema(&self, _expected_version: i64) -> Result<bool> {
    Ok(false)
  }

  fn get_single(&self, _url_hash: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn get_batch(&self, batch: &BatchUrl) -> Result<BatchLookup> {
    Ok(BatchLookup {
      matches: Vec::new(),
      misses: batch.ids.clone(),
      missed_url: batch.url(),
      ordered_ids: batch.ids.clone(),
    })
  }

  fn touch(&self, _url_hash: &str, _expiry: DateTime<Utc>) -> Result<()> {
    Ok(())
  }

  fn upsert_single(&self, _write: EntryWrite<'_>) -> Result<()> {
    Ok(()) // Discard
  }

  fn upsert_batch(
    &self,
    _batch: &BatchUrl,
    _members: &[CollectionMember],
    _meta: &EntryMeta,
  ) -> Result<usize> {
    Ok(0) // Discard
  }

  fn remove(&self, _url_hash: &str) -> Result<bool> {
    Ok(false)
  }

  fn reset(&self) -> Result<()> {
    Ok(())
  }

  fn stats(&self) -> Result<CacheStats> {
    Ok(CacheStats::default())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&db::default_path()?)
  }

  /// Open the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    tracing::info!(path = %path.display(), "Opening cache database");
    Ok(Self::from_connection(db::open(path)?))
  }

  /// Open a cache that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::from_connection(db::open_in_memory()?))
  }

  fn from_connection(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    url_hash TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    collection_type TEXT NOT NULL,
    url TEXT NOT NULL,
    payload TEXT NOT NULL,
    expiry TEXT NOT NULL,
    version INTEGER NOT NULL,
    frequency INTEGER NOT NULL,
    checksum TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_type ON cache_entries(entity_type);
"#;

/// One-row table holding the schema version the cache was built for.
const VERSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_schema (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
"#;

const SELECT_ENTRY: &str = "SELECT url_hash, entity_type, collection_type, url, payload, expiry,
        version, frequency, checksum
   FROM cache_entries WHERE url_hash = ?";

fn recreate_cache_table(conn: &Connection) -> Result<()> {
  conn
    .execute_batch("DROP TABLE IF EXISTS cache_entries;")
    .map_err(|e| eyre!("Failed to drop cache table: {}", e))?;
  conn
    .execute_batch(CACHE_SCHEMA)
    .map_err(|e| eyre!("Failed to create cache table: {}", e))?;
  Ok(())
}

fn read_schema_version(conn: &Connection) -> Result<Option<i64>> {
  conn
    .execute_batch(VERSION_SCHEMA)
    .map_err(|e| eyre!("Failed to create schema version table: {}", e))?;

  conn
    .query_row("SELECT version FROM cache_schema WHERE id = 1", [], |row| {
      row.get(0)
    })
    .optional()
    .map_err(|e| eyre!("Failed to read schema version: {}", e))
}

fn select_entry(conn: &Connection, url_hash: &str) -> Result<Option<CacheEntry>> {
  type Row = (String, String, String, String, String, String, i64, i64, String);

  let row: Option<Row> = conn
    .query_row(SELECT_ENTRY, params![url_hash], |row| {
      Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
      ))
    })
    .optional()
    .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

  let Some((hash, entity_type, collection_type, url, payload, expiry, version, frequency, sum)) = row
  else {
    return Ok(None);
  };

  Ok(Some(CacheEntry {
    url_hash: hash,
    entity_type,
    collection_type,
    url,
    payload,
    expiry: parse_datetime(&expiry)?,
    version,
    frequency,
    checksum: sum,
  }))
}

fn insert_entry(
  conn: &Connection,
  write: EntryWrite<'_>,
  version: i64,
  frequency: i64,
) -> Result<()> {
  conn
    .execute(
      "INSERT INTO cache_entries
         (url_hash, entity_type, collection_type, url, payload, expiry, version, frequency, checksum)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        write.url_hash,
        write.meta.entity_type,
        write.meta.collection_type,
        write.url,
        write.payload,
        write.meta.expiry.to_rfc3339(),
        version,
        frequency,
        write.checksum,
      ],
    )
    .map_err(|e| eyre!("Failed to insert cache entry: {}", e))?;
  Ok(())
}

fn touch_entry(conn: &Connection, url_hash: &str, expiry: DateTime<Utc>) -> Result<()> {
  conn
    .execute(
      "UPDATE cache_entries SET frequency = frequency + 1, expiry = ? WHERE url_hash = ?",
      params![expiry.to_rfc3339(), url_hash],
    )
    .map_err(|e| eyre!("Failed to touch cache entry: {}", e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn initialize_schema(&self, expected_version: i64) -> Result<bool> {
    let conn = self.lock()?;
    let current = read_schema_version(&conn)?;

    if matches!(current, Some(v) if v >= expected_version) {
      // Table may still be missing if the database was edited by hand
      conn
        .execute_batch(CACHE_SCHEMA)
        .map_err(|e| eyre!("Failed to create cache table: {}", e))?;
      return Ok(false);
    }

    tracing::info!(
      current = ?current,
      expected = expected_version,
      "Cache schema out of date, recreating"
    );

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    recreate_cache_table(&tx)?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_schema (id, version) VALUES (1, ?)",
      params![expected_version],
    )
    .map_err(|e| eyre!("Failed to write schema version: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  fn get_single(&self, url_hash: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    select_entry(&conn, url_hash)
  }

  fn get_batch(&self, batch: &BatchUrl) -> Result<BatchLookup> {
    let conn = self.lock()?;
    let mut matches = Vec::new();
    let mut misses = Vec::new();

    for id in &batch.ids {
      match select_entry(&conn, &url_hash(&batch.member_url(id)))? {
        Some(entry) => matches.push(BatchHit {
          id: id.clone(),
          entry,
        }),
        None => misses.push(id.clone()),
      }
    }

    Ok(BatchLookup {
      missed_url: batch.url_for(&misses),
      matches,
      misses,
      ordered_ids: batch.ids.clone(),
    })
  }

  fn touch(&self, url_hash: &str, expiry: DateTime<Utc>) -> Result<()> {
    let conn = self.lock()?;
    touch_entry(&conn, url_hash, expiry)
  }

  fn upsert_single(&self, write: EntryWrite<'_>) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let (version, frequency) = match select_entry(&tx, write.url_hash)? {
      Some(existing) => (existing.version, existing.frequency),
      None => (0, 0),
    };

    tx.execute(
      "DELETE FROM cache_entries WHERE url_hash = ?",
      params![write.url_hash],
    )
    .map_err(|e| eyre!("Failed to delete old cache entry: {}", e))?;
    insert_entry(&tx, write, version + 1, frequency + 1)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    tracing::debug!(url_hash = write.url_hash, version = version + 1, "Cache entry stored");
    Ok(())
  }

  fn upsert_batch(
    &self,
    batch: &BatchUrl,
    members: &[CollectionMember],
    meta: &EntryMeta,
  ) -> Result<usize> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let mut changed = 0;

    for member in members {
      let url = batch.member_url(&member.id);
      let hash = url_hash(&url);
      let sum = checksum(&member.payload);

      match select_entry(&tx, &hash)? {
        Some(existing) if existing.checksum == sum => {
          touch_entry(&tx, &hash, meta.expiry)?;
        }
        Some(_) => {
          tx.execute(
            "UPDATE cache_entries
                SET entity_type = ?, collection_type = ?, url = ?, payload = ?, expiry = ?,
                    checksum = ?, version = version + 1, frequency = frequency + 1
              WHERE url_hash = ?",
            params![
              meta.entity_type,
              meta.collection_type,
              url,
              member.payload,
              meta.expiry.to_rfc3339(),
              sum,
              hash,
            ],
          )
          .map_err(|e| eyre!("Failed to update cache entry: {}", e))?;
          changed += 1;
        }
        None => {
          let write = EntryWrite {
            url_hash: &hash,
            url: &url,
            payload: &member.payload,
            checksum: &sum,
            meta,
          };
          insert_entry(&tx, write, 1, 1)?;
          changed += 1;
        }
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    tracing::debug!(members = members.len(), changed, "Collection members stored");
    Ok(changed)
  }

  fn remove(&self, url_hash: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE url_hash = ?",
        params![url_hash],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(removed > 0)
  }

  fn reset(&self) -> Result<()> {
    let conn = self.lock()?;
    recreate_cache_table(&conn)?;
    tracing::info!("Cache reset");
    Ok(())
  }

  fn stats(&self) -> Result<CacheStats> {
    let conn = self.lock()?;
    let schema_version = read_schema_version(&conn)?;

    let (entries, total_frequency): (i64, i64) = conn
      .query_row(
        "SELECT COUNT(*), COALESCE(SUM(frequency), 0) FROM cache_entries",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to read cache stats: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT entity_type, COUNT(*) FROM cache_entries
         GROUP BY entity_type ORDER BY entity_type",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let by_entity_type = stmt
      .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
      .map_err(|e| eyre!("Failed to query entity types: {}", e))?
      .filter_map(|r| r.ok())
      .map(|(entity_type, count)| (entity_type, count as u64))
      .collect();

    Ok(CacheStats {
      entries: entries as u64,
      total_frequency,
      schema_version,
      by_entity_type,
    })
  }
}

/// Parse an RFC 3339 timestamp stored in the cache table.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
