use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use storesync::api::{QueryParams, RequestBuilder, ReqwestTransport, ResourceRequest};
use storesync::cache::{CacheStorage, NoopStorage, SqliteStorage};
use storesync::models::catalog;
use storesync::sync::{
  CallObserver, CallOptions, CustomerAuthRefresher, DeliverySource, RequestParams,
  SyncOrchestrator, SyncPolicy,
};
use storesync::Config;

#[derive(Parser, Debug)]
#[command(name = "storesync")]
#[command(about = "Cached client for a commerce REST API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a resource, printing the cached copy first when there is one
  Get {
    /// Resource path, e.g. `products`
    resource: String,
    /// Entity ids; more than one makes a batch request
    ids: Vec<String>,
    #[arg(long)]
    expand: Option<String>,
    #[arg(long)]
    locale: Option<String>,
    /// Skip the cache for this call
    #[arg(long)]
    no_cache: bool,
  },
  /// Drop every cached entry
  ResetCache,
  /// Show cache statistics
  Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let store = open_store(&config)?;

  match args.command {
    Command::Get {
      resource,
      ids,
      expand,
      locale,
      no_cache,
    } => {
      let mut params = QueryParams::default();
      if let Some(expand) = expand {
        params = params.with_filter("expand", expand);
      }
      if let Some(locale) = locale {
        params = params.with_locale(locale);
      }
      let request = ResourceRequest::new(&resource)
        .with_ids(ids)
        .with_params(params);
      get(&config, store, &request, no_cache).await?;
    }
    Command::ResetCache => {
      store.reset()?;
      println!("Cache cleared");
    }
    Command::Stats => {
      let stats = store.stats()?;
      println!("entries:         {}", stats.entries);
      println!("total frequency: {}", stats.total_frequency);
      match stats.schema_version {
        Some(version) => println!("schema version:  {}", version),
        None => println!("schema version:  none"),
      }
      for (entity_type, count) in &stats.by_entity_type {
        println!("  {:<16} {}", entity_type, count);
      }
    }
  }

  Ok(())
}

/// Logs go to stderr and a daily file; stdout carries responses only.
fn init_logging() -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env("STORESYNC_LOG")
    .unwrap_or_else(|_| EnvFilter::new("warn,storesync=info"));

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false);

  let (file_layer, guard) = match dirs::data_dir() {
    Some(dir) => {
      let appender =
        tracing_appender::rolling::daily(dir.join("storesync").join("logs"), "storesync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .init();

  guard
}

fn open_store(config: &Config) -> Result<Arc<dyn CacheStorage>> {
  if !config.cache.enabled {
    return Ok(Arc::new(NoopStorage));
  }

  let storage = match &config.cache.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  if storage.initialize_schema(config.cache.schema_version)? {
    info!(version = config.cache.schema_version, "Cache schema initialized");
  }

  Ok(Arc::new(storage))
}

async fn get(
  config: &Config,
  store: Arc<dyn CacheStorage>,
  request: &ResourceRequest,
  no_cache: bool,
) -> Result<()> {
  let transport = ReqwestTransport::new()?;
  let refresher = CustomerAuthRefresher::new(&config.api.client_id, config.api.timeout())?;

  let orchestrator = SyncOrchestrator::new(
    store,
    RequestBuilder::from_config(&config.api),
    Arc::new(transport),
    SyncPolicy::from_config(config),
  )
  .with_token_refresher(Arc::new(refresher))
  .with_token(Config::api_token());

  let mut options = CallOptions::default();
  if no_cache {
    options = options.no_cache();
  }

  let mut model = catalog::model_for(&request.resource);
  let report = orchestrator
    .api_call(
      model.as_mut(),
      request,
      RequestParams::get(),
      options,
      &mut Printer,
    )
    .await;

  info!(
    url = %report.url,
    outcome = ?report.outcome,
    attempts = report.network_attempts,
    "Call finished"
  );
  report.result?;
  Ok(())
}

/// Prints each delivery as pretty JSON.
struct Printer;

impl CallObserver for Printer {
  fn on_success(&mut self, response: &Value, source: DeliverySource) {
    let label = match source {
      DeliverySource::Cache => "cache",
      DeliverySource::Network => "network",
    };
    match serde_json::to_string_pretty(response) {
      Ok(text) => println!("# {}\n{}", label, text),
      Err(e) => warn!(error = %e, "Failed to render response"),
    }
  }
}
