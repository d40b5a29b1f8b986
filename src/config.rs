use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL all resource paths are appended to,
  /// e.g. `https://shop.example.com/s/Site/dw/shop/v20_4`
  pub base_url: String,
  pub client_id: String,
  pub locale: Option<String>,
  pub currency: Option<String>,
  pub country: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_true")]
  pub validate_tls: bool,
  /// Send PUT/PATCH/DELETE as POST with a method-override header
  #[serde(default = "default_true")]
  pub method_override: bool,
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Global proxy-cache switch
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Bumping this drops every cached entry on next start
  #[serde(default = "default_schema_version")]
  pub schema_version: i64,
  /// Database location (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  /// Expiry hint used when a response carries no `Cache-Control: max-age`
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      schema_version: default_schema_version(),
      path: None,
      default_ttl_secs: default_ttl_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Status codes retried for GET requests while budget remains
  #[serde(default = "default_retry_statuses")]
  pub retry_statuses: BTreeSet<u16>,
  #[serde(default = "default_retry_budget")]
  pub retry_budget: u32,
  /// Treat connection failures and timeouts as retryable
  #[serde(default = "default_true")]
  pub retry_on_transport_error: bool,
  /// Fault types that trigger a token refresh and replay
  #[serde(default = "default_token_faults")]
  pub token_faults: BTreeSet<String>,
  /// Fault types never forwarded to the error reporter
  #[serde(default)]
  pub ignored_faults: BTreeSet<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retry_statuses: default_retry_statuses(),
      retry_budget: default_retry_budget(),
      retry_on_transport_error: true,
      token_faults: default_token_faults(),
      ignored_faults: BTreeSet::new(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_schema_version() -> i64 {
  1
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_retry_statuses() -> BTreeSet<u16> {
  [408, 503, 504].into_iter().collect()
}

fn default_retry_budget() -> u32 {
  2
}

fn default_token_faults() -> BTreeSet<String> {
  ["InvalidAccessTokenException", "ExpiredTokenException"]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storesync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/storesync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the bearer token from the environment, if one is set.
  ///
  /// Checks STORESYNC_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("STORESYNC_TOKEN").ok()
  }
}
