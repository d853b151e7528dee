mod cache;
mod config;
mod event;
mod http;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStore, MemoryStore, SqliteStore};
use crate::event::Interceptor;
use crate::http::{Destination, HttpClient, Request, RequestMode};
use crate::worker::{StartOutcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "offline-cache")]
#[command(about = "An offline-first HTTP response cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured cache version
  Start,
  /// Install, then activate even when `skip_waiting` is off
  Activate,
  /// Send one request through the cache
  Fetch {
    /// Absolute URL, or a path relative to the app origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body (for non-GET methods)
    #[arg(short = 'd', long)]
    data: Option<String>,
    /// Treat the request as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// Request mode (overrides `--navigate`)
    #[arg(long, value_enum)]
    mode: Option<RequestMode>,
    /// Destination hint, e.g. `image`
    #[arg(long, value_enum)]
    destination: Option<Destination>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List stored namespaces
  Namespaces,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  let config = config::Config::load(args.config.as_deref())?;

  let store = open_store(&config, args.ephemeral)?;

  match args.command {
    Command::Start => {
      let worker = Worker::new(&config, store, Arc::new(HttpClient::new(&config)?))?;
      report_start(&worker.start().await?);
      println!("state: {}", worker.state());
    }
    Command::Activate => {
      let worker = Worker::new(&config, store, Arc::new(HttpClient::new(&config)?))?;
      let outcome = worker.start().await?;
      report_start(&outcome);
      if let StartOutcome::Waiting { .. } = outcome {
        let report = worker.activate().await?;
        for ns in &report.deleted {
          eprintln!("evicted {}", ns);
        }
        eprintln!("claimed {} client(s)", report.claimed);
      }
      println!("state: {}", worker.state());
    }
    Command::Fetch {
      url,
      method,
      headers,
      data,
      navigate,
      mode,
      destination,
      output,
    } => {
      let worker = Arc::new(Worker::new(
        &config,
        store,
        Arc::new(HttpClient::new(&config)?),
      )?);
      report_start(&worker.start().await?);

      let url = config
        .app
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

      let mut request = Request::get(url).with_method(method);
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
        request
          .headers
          .push((name.trim().to_string(), value.trim().to_string()));
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }
      if navigate {
        request.mode = RequestMode::Navigate;
        request.destination = Destination::Document;
      }
      if let Some(mode) = mode {
        request.mode = mode;
      }
      if let Some(destination) = destination {
        request = request.with_destination(destination);
      }

      let interceptor = Interceptor::new(Arc::clone(&worker));
      let client = worker.register_client();
      let served = interceptor.fetch(client, request).await?;
      worker.unregister_client(client);
      worker.flush().await;

      eprintln!("status: {}", served.response.status);
      eprintln!("source: {}", served.source);
      if let Some(content_type) = served.response.header("content-type") {
        eprintln!("content-type: {}", content_type);
      }
      if let Some(cached_at) = served.cached_at {
        eprintln!("cached at: {}", cached_at.to_rfc3339());
      }

      match output {
        Some(path) => std::fs::write(&path, &served.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout().write_all(&served.response.body)?,
      }

      if served.response.is_error() {
        return Err(eyre!("No response available"));
      }
    }
    Command::Namespaces => {
      let current = config.version().namespace();
      for namespace in store.list_namespaces().await? {
        let marker = if namespace == current { "*" } else { " " };
        println!("{} {}", marker, namespace);
      }
    }
  }

  Ok(())
}

/// The configured quota applies to both backends.
fn open_store(config: &config::Config, ephemeral: bool) -> Result<Arc<dyn CacheStore>> {
  let quota = config.storage.quota_bytes;
  if ephemeral {
    return Ok(Arc::new(MemoryStore::new().with_quota(quota)));
  }
  Ok(Arc::new(
    SqliteStore::open(config.storage.path.as_deref())?.with_quota(quota),
  ))
}

fn report_start(outcome: &StartOutcome) {
  match outcome {
    StartOutcome::Active { namespace, report } => {
      eprintln!("serving {}", namespace);
      for ns in &report.deleted {
        eprintln!("evicted {}", ns);
      }
      for ns in &report.failed {
        eprintln!("could not evict {}", ns);
      }
    }
    StartOutcome::Waiting { namespace } => eprintln!("installed {}, waiting to activate", namespace),
    StartOutcome::Degraded { namespace, error } => {
      eprintln!("install failed ({}), serving {}", error, namespace)
    }
  }
}

/// Logs go to a daily file under the data directory unless `verbose` is set.
fn init_tracing(verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_cache=info"));

  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offline-cache")
    .join("logs");

  let appender = tracing_appender::rolling::daily(log_dir, "offline-cache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
