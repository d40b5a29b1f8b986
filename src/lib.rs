//! Cache-and-sync layer for commerce REST APIs.
//!
//! Every read issued through [`SyncOrchestrator`] is mediated by a persistent
//! SQLite cache keyed by the digest of the canonical request URL. Cached
//! payloads are delivered immediately and then revalidated against the
//! network; checksums decide whether the revalidated response is new.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod sync;

pub use api::{HttpMethod, RequestBuilder, ResourceRequest};
pub use cache::{CacheStorage, NoopStorage, SqliteStorage};
pub use config::Config;
pub use models::{JsonModel, SyncModel};
pub use sync::{CallOptions, CallReport, PendingCall, RequestParams, SyncError, SyncOrchestrator};
