use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Get the default database path
pub fn default_path() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("storesync").join("cache.db"))
}

/// Open or create the database at `path`
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  conn
    .pragma_update(None, "journal_mode", "WAL")
    .map_err(|e| eyre!("Failed to enable WAL mode: {}", e))?;

  Ok(conn)
}

/// Open a private in-memory database
pub fn open_in_memory() -> Result<Connection> {
  Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))
}
