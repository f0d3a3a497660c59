use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use limoney_sw::cache::{CacheStorage, SqliteStorage};
use limoney_sw::clients::ClientRegistry;
use limoney_sw::config::Config;
use limoney_sw::http::{Request, RequestDestination};
use limoney_sw::network::{HttpNetwork, Network};
use limoney_sw::worker::{FetchOutcome, ServiceWorker, WorkerConfig};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "limoney-sw")]
#[command(about = "Offline asset cache controller for the Limoney web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/limoney-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the worker serves, e.g. http://localhost:5001
  #[arg(long)]
  origin: Option<String>,

  /// Generation tag for the cache bucket
  #[arg(long)]
  tag: Option<String>,

  /// Write logs to a daily-rotated file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static asset list into the current bucket
  Install,
  /// Install, then purge stale buckets
  Activate,
  /// Route one request through the active worker
  Fetch {
    /// Path or absolute URL to request
    path: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a top-level page navigation
    #[arg(long)]
    navigate: bool,
    /// Request destination (style, script, image, font, ...)
    #[arg(short, long)]
    destination: Option<String>,
  },
  /// List cache buckets and their entries
  Buckets,
}

type CliWorker = ServiceWorker<SqliteStorage, HttpNetwork, ClientRegistry>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_dir.as_deref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override from command line
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(tag) = args.tag {
    config.cache.generation_tag = tag;
  }

  let worker_config = WorkerConfig::from_config(&config)?;
  let storage = Arc::new(SqliteStorage::open(config.storage.path.as_deref())?);
  let network = Arc::new(HttpNetwork::new(Duration::from_secs(30))?);
  let clients = Arc::new(ClientRegistry::new());

  match args.command {
    Command::Install => {
      let worker = CliWorker::new(worker_config, storage, network, clients);
      let report = worker.install().await?;
      for asset in &report.cached {
        println!("cached  {}", asset);
      }
      for (asset, reason) in &report.failed {
        println!("failed  {} ({})", asset, reason);
      }
    }
    Command::Activate => {
      let worker = CliWorker::new(worker_config, storage, network, clients);
      worker.install().await?;
      let report = worker.activate().await?;
      println!("active bucket: {}", worker.config().generation_tag());
      for bucket in &report.deleted {
        println!("deleted {}", bucket);
      }
      for (bucket, reason) in &report.failed {
        println!("failed  {} ({})", bucket, reason);
      }
    }
    Command::Fetch {
      path,
      method,
      navigate,
      destination,
    } => {
      let request = build_request(&worker_config, &path, &method, navigate, destination.as_deref())?;
      let worker = CliWorker::revive(worker_config, storage, Arc::clone(&network), clients);
      match worker.handle_fetch(&request).await? {
        FetchOutcome::Respond(result) => {
          println!(
            "{} {} ({:?}, {} bytes)",
            result.data.status,
            result.data.url,
            result.source,
            result.data.body.len()
          );
        }
        FetchOutcome::Passthrough(reason) => {
          // Default browser handling: plain network request
          let response = network.fetch(&request).await?;
          println!(
            "{} {} (not intercepted: {:?}, {} bytes)",
            response.status,
            response.url,
            reason,
            response.body.len()
          );
        }
      }
    }
    Command::Buckets => {
      for bucket in storage.keys()? {
        let entries = storage.entries(&bucket)?;
        println!("{} ({} entries)", bucket, entries.len());
        for key in entries {
          println!("  {} {}", key.method, key.url);
        }
      }
    }
  }

  Ok(())
}

fn build_request(
  config: &WorkerConfig,
  path: &str,
  method: &str,
  navigate: bool,
  destination: Option<&str>,
) -> Result<Request> {
  let url = config
    .origin
    .join(path)
    .map_err(|e| eyre!("Invalid request path {}: {}", path, e))?;
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  request = request.with_method(method);
  if let Some(dest) = destination {
    request = request.with_destination(RequestDestination::parse(dest)?);
  }
  Ok(request)
}

/// Log to stderr, or to a daily-rotated file when `log_dir` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "limoney-sw.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}
