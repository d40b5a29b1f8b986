//! Orchestrates cache consultation, network revalidation and recovery.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::collaborators::{
  ErrorReporter, NoTokenRefresh, NoopSession, Notifier, SessionListener, TokenRefresher,
  TracingNotifier, TracingReporter,
};
use super::error::SyncError;
use super::pending::PendingCall;
use crate::api::collection;
use crate::api::fault;
use crate::api::{
  BuiltUrl, Fault, HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBuilder,
  ResourceRequest, TransportError,
};
use crate::cache::{
  checksum, url_hash, BatchLookup, BatchUrl, CacheEntry, CacheStorage, CollectionMember,
  EntryMeta, EntryWrite,
};
use crate::config::Config;
use crate::models::SyncModel;

/// Status the gateway returns for transient upstream failures.
const BAD_GATEWAY: u16 = 502;

const UNAVAILABLE_MESSAGE: &str = "The store is temporarily unavailable. Please try again.";

/// Knobs governing caching and recovery.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
  /// Global proxy-cache switch
  pub proxy_cache: bool,
  pub retry_statuses: BTreeSet<u16>,
  pub retry_budget: u32,
  pub retry_on_transport_error: bool,
  pub token_faults: BTreeSet<String>,
  pub ignored_faults: BTreeSet<String>,
  /// Expiry hint when a response has no `max-age`
  pub default_ttl: Duration,
  pub timeout: Duration,
  pub validate_tls: bool,
}

impl Default for SyncPolicy {
  fn default() -> Self {
    Self::from_config_parts(
      &crate::config::CacheConfig::default(),
      &crate::config::SyncConfig::default(),
    )
  }
}

impl SyncPolicy {
  pub fn from_config(config: &Config) -> Self {
    Self {
      timeout: config.api.timeout(),
      validate_tls: config.api.validate_tls,
      ..Self::from_config_parts(&config.cache, &config.sync)
    }
  }

  fn from_config_parts(cache: &crate::config::CacheConfig, sync: &crate::config::SyncConfig) -> Self {
    Self {
      proxy_cache: cache.enabled,
      retry_statuses: sync.retry_statuses.clone(),
      retry_budget: sync.retry_budget,
      retry_on_transport_error: sync.retry_on_transport_error,
      token_faults: sync.token_faults.clone(),
      ignored_faults: sync.ignored_faults.clone(),
      default_ttl: Duration::from_secs(cache.default_ttl_secs),
      timeout: Duration::from_secs(30),
      validate_tls: true,
    }
  }
}

/// Method, headers and body of one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
  pub method: HttpMethod,
  pub headers: Vec<(String, String)>,
  /// Defaults to the model's JSON for POST/PUT/PATCH
  pub body: Option<Value>,
}

impl RequestParams {
  pub fn new(method: HttpMethod) -> Self {
    Self {
      method,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get() -> Self {
    Self::new(HttpMethod::Get)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

impl Default for RequestParams {
  fn default() -> Self {
    Self::get()
  }
}

/// Per-call options.
#[derive(Debug, Default)]
pub struct CallOptions {
  /// `Some(false)` bypasses the cache for this call
  pub cache: Option<bool>,
  /// Overrides the policy's retry budget for a new pending call
  pub retry_budget: Option<u32>,
  /// Existing pending call (and its promise) to settle
  pub pending: Option<PendingCall>,
}

impl CallOptions {
  pub fn no_cache(mut self) -> Self {
    self.cache = Some(false);
    self
  }

  pub fn with_retry_budget(mut self, budget: u32) -> Self {
    self.retry_budget = Some(budget);
    self
  }

  pub fn attach(mut self, pending: PendingCall) -> Self {
    self.pending = Some(pending);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
  /// Stale payload served before (or instead of) the network
  Cache,
  Network,
}

/// Receives the results of a call as they become available.
///
/// `on_success` may fire twice for one call: once with the cached payload
/// and again with the network response when its content differs. Rendering
/// in `on_success` must therefore be idempotent.
pub trait CallObserver: Send {
  fn on_success(&mut self, response: &Value, source: DeliverySource);

  /// Called once, for terminal failures only.
  fn on_error(&mut self, _error: &SyncError) {}
}

impl CallObserver for () {
  fn on_success(&mut self, _response: &Value, _source: DeliverySource) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
  /// Every batch member was cached; no request was sent
  ServedFromCache,
  /// Revalidation found the cached content current
  Unchanged,
  /// A network response was delivered
  Delivered,
  Rejected,
}

/// What happened during one logical call.
#[derive(Debug)]
pub struct CallReport {
  /// Canonical URL of the logical request
  pub url: String,
  pub outcome: CallOutcome,
  /// Number of `on_success` invocations
  pub deliveries: usize,
  pub network_attempts: u32,
  /// Budget left for configured retryable failures when the call ended
  pub retries_left: u32,
  pub token_refreshed: bool,
  /// First settlement of the call's promise
  pub result: Result<Value, SyncError>,
}

impl CallReport {
  fn new(url: &str) -> Self {
    Self {
      url: url.to_string(),
      outcome: CallOutcome::Rejected,
      deliveries: 0,
      network_attempts: 0,
      retries_left: 0,
      token_refreshed: false,
      result: Err(SyncError::Abandoned),
    }
  }
}

enum Failure {
  Status(HttpResponse),
  Transport(TransportError),
}

impl Failure {
  fn status(&self) -> Option<u16> {
    match self {
      Self::Status(response) => Some(response.status),
      Self::Transport(_) => None,
    }
  }

  fn into_error(self, url: &str, model: &str) -> SyncError {
    match self {
      Self::Status(response) => SyncError::Http {
        url: url.to_string(),
        status: response.status,
        model: model.to_string(),
        fault: Fault::parse(&response.body),
        body: response.body,
      },
      Self::Transport(e) => SyncError::Transport {
        url: url.to_string(),
        model: model.to_string(),
        timeout: e.is_timeout(),
        message: e.to_string(),
      },
    }
  }
}

/// The central sync engine.
///
/// Owns no cache lifecycle: the application opens the store, runs
/// `initialize_schema` and hands it in.
pub struct SyncOrchestrator {
  store: Arc<dyn CacheStorage>,
  builder: RequestBuilder,
  transport: Arc<dyn HttpTransport>,
  refresher: Arc<dyn TokenRefresher>,
  reporter: Arc<dyn ErrorReporter>,
  notifier: Arc<dyn Notifier>,
  session: Arc<dyn SessionListener>,
  policy: SyncPolicy,
  token: RwLock<Option<String>>,
}

impl SyncOrchestrator {
  pub fn new(
    store: Arc<dyn CacheStorage>,
    builder: RequestBuilder,
    transport: Arc<dyn HttpTransport>,
    policy: SyncPolicy,
  ) -> Self {
    Self {
      store,
      builder,
      transport,
      refresher: Arc::new(NoTokenRefresh),
      reporter: Arc::new(TracingReporter),
      notifier: Arc::new(TracingNotifier),
      session: Arc::new(NoopSession),
      policy,
      token: RwLock::new(None),
    }
  }

  pub fn with_token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
    self.refresher = refresher;
    self
  }

  pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
    self.reporter = reporter;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_session_listener(mut self, session: Arc<dyn SessionListener>) -> Self {
    self.session = session;
    self
  }

  pub fn with_token(self, token: Option<String>) -> Self {
    if let Some(token) = token {
      self.store_token(&token);
    }
    self
  }

  pub fn store(&self) -> &Arc<dyn CacheStorage> {
    &self.store
  }

  pub fn builder(&self) -> &RequestBuilder {
    &self.builder
  }

  /// Current `Authorization` header value, if any.
  pub fn token(&self) -> Option<String> {
    self.token.read().ok().and_then(|t| t.clone())
  }

  fn store_token(&self, token: &str) {
    if let Ok(mut current) = self.token.write() {
      *current = Some(token.to_string());
    }
  }

  /// Run one logical call against `request`.
  ///
  /// With caching active, a cached payload is delivered to `observer` and
  /// settles the promise before the network is consulted. The network
  /// response is then delivered a second time only if its checksum differs
  /// from the cached one. A batch request whose members are all cached is
  /// answered without any network call.
  ///
  /// 502 responses are retried without limit. Statuses in the policy's
  /// retry set are retried for GET while the pending call has budget. An
  /// access-token fault triggers one token refresh and one replay.
  pub async fn api_call<M>(
    &self,
    model: &mut M,
    request: &ResourceRequest,
    params: RequestParams,
    options: CallOptions,
    observer: &mut dyn CallObserver,
  ) -> CallReport
  where
    M: SyncModel + ?Sized,
  {
    let caching = self.caching_active(&*model, &options);
    let retry_budget = options.retry_budget.unwrap_or(self.policy.retry_budget);
    let mut pending = options
      .pending
      .unwrap_or_else(|| PendingCall::detached(retry_budget));

    let built = self.builder.build(request, &model.query_params());
    let mut report = CallReport::new(&built.url);
    let mut outbound_url = built.url.clone();
    let mut stale: Option<CacheEntry> = None;
    let mut partial: Option<BatchLookup> = None;

    if caching {
      match &built.batch {
        None => stale = self.lookup_single(&built.url),
        Some(batch) => {
          if let Some(lookup) = self.lookup_batch(batch) {
            if lookup.is_complete() {
              debug!(url = %built.url, members = lookup.matches.len(), "Batch served from cache");
              let combined = collection::recombine(&lookup, &[], None);
              deliver(model, observer, &mut pending, combined, DeliverySource::Cache, true);
              report.deliveries += 1;
              report.outcome = CallOutcome::ServedFromCache;
              return self.finish(report, pending);
            }

            debug!(
              url = %built.url,
              hits = lookup.matches.len(),
              misses = lookup.misses.len(),
              "Batch partially cached"
            );
            outbound_url = lookup.missed_url.clone();
            partial = Some(lookup);
          }
        }
      }
    }

    if let Some(entry) = stale.take() {
      match serde_json::from_str::<Value>(&entry.payload) {
        Ok(value) => {
          debug!(url_hash = %entry.url_hash, version = entry.version, "Delivering cached payload");
          let value = model.normalize(value);
          deliver(model, observer, &mut pending, value, DeliverySource::Cache, false);
          report.deliveries += 1;
          stale = Some(entry);
        }
        Err(e) => warn!(url_hash = %entry.url_hash, error = %e, "Unreadable cache entry, ignoring"),
      }
    }

    let mut refreshed = false;
    loop {
      report.network_attempts += 1;
      let http_request = self.outbound(&*model, &params, &outbound_url);

      let failure = match self.transport.send(&http_request).await {
        Ok(response) if response.is_success() => {
          report.outcome = self.on_response(
            model,
            &built,
            stale.as_ref(),
            partial.as_ref(),
            response,
            caching,
            &mut pending,
            observer,
          );
          if report.outcome == CallOutcome::Delivered {
            report.deliveries += 1;
          }
          break;
        }
        Ok(response) => Failure::Status(response),
        Err(e) => Failure::Transport(e),
      };

      let status = failure.status();
      if status == Some(BAD_GATEWAY) {
        warn!(url = %outbound_url, attempt = report.network_attempts, "Bad gateway, retrying");
        continue;
      }

      let retryable = match status {
        Some(status) => self.policy.retry_statuses.contains(&status),
        None => self.policy.retry_on_transport_error,
      };
      let retry_class = retryable && params.method == HttpMethod::Get;
      if retry_class && pending.take_retry() {
        warn!(
          url = %outbound_url,
          status = ?status,
          retries_left = pending.retries_left(),
          "Retrying request"
        );
        continue;
      }

      let error = failure.into_error(&outbound_url, model.name());
      let token_fault = error
        .fault()
        .is_some_and(|f| self.policy.token_faults.contains(&f.fault_type));
      if token_fault && !refreshed {
        refreshed = true;
        match self.refresh_token().await {
          Ok(()) => {
            info!(url = %outbound_url, "Access token refreshed, replaying request");
            report.token_refreshed = true;
            continue;
          }
          Err(e) => warn!(error = %e, "Token refresh failed"),
        }
      }

      self.reject(model, observer, &mut pending, error, retry_class);
      report.outcome = CallOutcome::Rejected;
      break;
    }

    self.finish(report, pending)
  }

  fn caching_active<M: SyncModel + ?Sized>(&self, model: &M, options: &CallOptions) -> bool {
    options.cache != Some(false)
      && model.cache_eligible()
      && !model.is_secure()
      && self.policy.proxy_cache
  }

  fn lookup_single(&self, url: &str) -> Option<CacheEntry> {
    match self.store.get_single(&url_hash(url)) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url, error = %e, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  fn lookup_batch(&self, batch: &BatchUrl) -> Option<BatchLookup> {
    match self.store.get_batch(batch) {
      Ok(lookup) => Some(lookup),
      Err(e) => {
        warn!(url = %batch.url(), error = %e, "Batch cache lookup failed, treating as miss");
        None
      }
    }
  }

  fn outbound<M: SyncModel + ?Sized>(
    &self,
    model: &M,
    params: &RequestParams,
    url: &str,
  ) -> HttpRequest {
    let mut headers = params.headers.clone();
    if let Some(token) = self.token() {
      headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
      headers.push(("Authorization".to_string(), bearer(&token)));
    }

    let body = match (&params.body, params.method) {
      (Some(body), _) => Some(body.to_string()),
      (None, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch) => {
        Some(model.to_json().to_string())
      }
      (None, _) => None,
    };
    if body.is_some()
      && !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
      headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }

    let method = self.builder.outbound_method(params.method, &mut headers);

    HttpRequest {
      method,
      url: url.to_string(),
      headers,
      body,
      timeout: model.timeout().unwrap_or(self.policy.timeout),
      validate_tls: model.validate_tls().unwrap_or(self.policy.validate_tls),
    }
  }

  /// Handle a 2xx response: diff against the cache, store, deliver.
  #[allow(clippy::too_many_arguments)]
  fn on_response<M: SyncModel + ?Sized>(
    &self,
    model: &mut M,
    built: &BuiltUrl,
    stale: Option<&CacheEntry>,
    partial: Option<&BatchLookup>,
    response: HttpResponse,
    caching: bool,
    pending: &mut PendingCall,
    observer: &mut dyn CallObserver,
  ) -> CallOutcome {
    let value = if response.body.trim().is_empty() {
      Value::Null
    } else {
      match serde_json::from_str::<Value>(&response.body) {
        Ok(value) => value,
        Err(e) => {
          let error = SyncError::Decode {
            url: built.url.clone(),
            model: model.name().to_string(),
            message: e.to_string(),
          };
          self.reject(model, observer, pending, error, false);
          return CallOutcome::Rejected;
        }
      }
    };

    let mut fresh_members: Vec<CollectionMember> = Vec::new();
    if caching {
      let expiry = self.expiry_for(&response);
      let sum = checksum(&response.body);

      if let Some(entry) = stale {
        if entry.checksum == sum {
          if let Err(e) = self.store.touch(&entry.url_hash, expiry) {
            warn!(url_hash = %entry.url_hash, error = %e, "Failed to touch cache entry");
          }
          debug!(url_hash = %entry.url_hash, "Revalidated, content unchanged");
          return CallOutcome::Unchanged;
        }
      }

      let meta = EntryMeta {
        entity_type: model.entity_type().to_string(),
        collection_type: model.collection_type().to_string(),
        expiry,
      };
      fresh_members = self.write_cache(built, &response.body, &sum, &meta, model.id_field());
    }

    if let Some(etag) = response.header("etag") {
      model.set_etag(etag);
    }
    if let Some(token) = response.header("authorization") {
      model.set_auth_token(token);
      self.store_token(token);
    }

    let value = model.normalize(value);
    // Nothing cached means the response is already the whole batch
    let value = match partial {
      Some(lookup) if !lookup.matches.is_empty() => {
        collection::recombine(lookup, &fresh_members, Some(&value))
      }
      _ => value,
    };

    deliver(
      model,
      observer,
      pending,
      value,
      DeliverySource::Network,
      built.is_collection(),
    );
    CallOutcome::Delivered
  }

  /// Store a changed response. Returns the decoded members of a collection.
  fn write_cache(
    &self,
    built: &BuiltUrl,
    body: &str,
    sum: &str,
    meta: &EntryMeta,
    id_field: &str,
  ) -> Vec<CollectionMember> {
    let Some(batch) = &built.batch else {
      let hash = url_hash(&built.url);
      let write = EntryWrite {
        url_hash: &hash,
        url: &built.url,
        payload: body,
        checksum: sum,
        meta,
      };
      match self.store.upsert_single(write) {
        Ok(()) => info!(url = %built.url, "Cache entry updated"),
        Err(e) => warn!(url = %built.url, error = %e, "Failed to update cache entry"),
      }
      return Vec::new();
    };

    match collection::decode_members(body, id_field) {
      Ok(members) => {
        match self.store.upsert_batch(batch, &members, meta) {
          Ok(changed) => info!(url = %built.url, members = members.len(), changed, "Collection cached"),
          Err(e) => warn!(url = %built.url, error = %e, "Failed to cache collection"),
        }
        members
      }
      Err(e) => {
        warn!(url = %built.url, error = %e, "Collection response not decodable, not cached");
        Vec::new()
      }
    }
  }

  fn expiry_for(&self, response: &HttpResponse) -> DateTime<Utc> {
    let ttl = response.max_age().unwrap_or(self.policy.default_ttl);
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
  }

  async fn refresh_token(&self) -> Result<(), SyncError> {
    let current = self.token();
    let token = self
      .refresher
      .refresh(self.builder.base_url(), current.as_deref())
      .await?;
    self.store_token(&token);
    Ok(())
  }

  fn reject<M: SyncModel + ?Sized>(
    &self,
    model: &mut M,
    observer: &mut dyn CallObserver,
    pending: &mut PendingCall,
    error: SyncError,
    retry_class: bool,
  ) {
    error!(status = ?error.status(), "{}", error);
    observer.on_error(&error);

    if let SyncError::Http { body, .. } = &error {
      if let Some(data) = fault::partial_data(body) {
        model.set(&data, true);
      }
    }

    let ignored = error
      .fault()
      .is_some_and(|f| self.policy.ignored_faults.contains(&f.fault_type));
    if !ignored {
      self.reporter.report(&error.diagnostic());
    }

    let server_error = error.status().is_some_and(|status| status >= 500);
    if server_error || retry_class {
      self.notifier.notify(UNAVAILABLE_MESSAGE, false);
    }

    pending.reject(error);
  }

  fn finish(&self, mut report: CallReport, pending: PendingCall) -> CallReport {
    self.session.session_renewed();
    report.retries_left = pending.retries_left();
    report.result = pending.into_outcome();
    report
  }
}

fn deliver<M: SyncModel + ?Sized>(
  model: &mut M,
  observer: &mut dyn CallObserver,
  pending: &mut PendingCall,
  value: Value,
  source: DeliverySource,
  collection: bool,
) {
  if collection {
    model.reset(&value);
  } else {
    if source == DeliverySource::Network {
      model.clear(true);
    }
    model.set(&value, false);
  }
  observer.on_success(&value, source);
  pending.resolve(value);
}

fn bearer(token: &str) -> String {
  if token.starts_with("Bearer ") {
    token.to_string()
  } else {
    format!("Bearer {}", token)
  }
}
