use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use permit_offline::cache::{CacheStorage, SqliteStorage};
use permit_offline::net::{HttpNetwork, Method, Network, Request, RequestMode, Response};
use permit_offline::queue::{QueueStore, SqliteQueue};
use permit_offline::sync::{SqliteScheduler, SyncScheduler};
use permit_offline::engine::resume_config;
use permit_offline::{ClientMessage, Config, Engine, Host};

#[derive(Parser, Debug)]
#[command(name = "permit-offline")]
#[command(about = "Offline caching and mutation replay for the hunting-permit app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/permit-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also write logs to permit-offline.log next to the database
  #[arg(long)]
  log_file: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell and activate the worker
  Install,
  /// Route one request through the engine
  Fetch {
    url: String,
    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as 'Name: value'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Deliver a JSON client message, e.g. '{"type":"ONLINE_STATUS_CHANGE","online":true}'
  Message { json: String },
  /// Fire every pending deferred sync
  Sync,
  /// List queued mutations in replay order
  Queue,
  /// List cache namespaces, marking the active one
  Caches,
}

/// Install the tracing subscriber. The returned guard flushes the log file
/// on drop and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("permit_offline=info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::never(dir, "permit-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}

fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", raw))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

fn print_response(response: &Response) {
  println!("{} ({})", response.status, response.source);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.text());
}

fn not_installed() -> color_eyre::Report {
  eyre!("No active worker, run `permit-offline install` first")
}

fn format_millis(ms: i64) -> String {
  DateTime::<Utc>::from_timestamp_millis(ms)
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| ms.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Arc::new(Config::load(args.config.as_deref())?);
  let db_path = config.database_path()?;

  let log_dir = if args.log_file {
    let dir = db_path
      .parent()
      .ok_or_else(|| eyre!("Database path has no parent directory"))?
      .to_path_buf();
    std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
    Some(dir)
  } else {
    None
  };
  let _guard = init_tracing(log_dir.as_deref());

  let storage = Arc::new(SqliteStorage::open(&db_path)?);
  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config)?);
  let queue = Arc::new(SqliteQueue::new(&db_path));
  let scheduler = Arc::new(SqliteScheduler::new(&db_path));

  let bind = |config: Arc<Config>| {
    let mut host = Host::new();
    Engine::new(
      config,
      Arc::clone(&storage),
      Arc::clone(&network),
      queue.clone(),
      scheduler.clone(),
    )
    .bind(&mut host);
    host
  };

  // Every command but `install` resumes the worker that last activated,
  // which keeps serving when an upgrade failed to install.
  let resume = || -> Result<Option<Host>> {
    match resume_config(&config, storage.as_ref())? {
      Some(active) => {
        let mut host = bind(Arc::new(active));
        host.resume()?;
        Ok(Some(host))
      }
      None => Ok(None),
    }
  };

  match args.command {
    Command::Install => {
      let mut host = bind(Arc::clone(&config));
      let state = host.start().await?;
      info!(?state, namespace = %config.cache_name, "Install finished");
      println!("{:?}", state);
    }
    Command::Fetch {
      url,
      method,
      headers,
      data,
      navigate,
    } => {
      let method: Method = method.parse()?;
      let mut request = Request::new(method, url);
      if navigate {
        request.mode = RequestMode::Navigate;
      }
      for raw in &headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
      }
      if let Some(body) = data {
        request = request.with_body(body);
      }

      let host = resume()?;
      if host.is_none() {
        warn!("No active worker, request goes straight to the network");
      }

      let intercepted = match &host {
        Some(host) => host.fetch(request.clone()).await,
        None => None,
      };
      let response = match intercepted {
        Some(result) => result?,
        None => network.fetch(&request).await?,
      };
      print_response(&response);
    }
    Command::Message { json } => {
      let message: ClientMessage =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid client message: {}", e))?;
      let host = resume()?.ok_or_else(not_installed)?;
      host.post_message(message).await;
    }
    Command::Sync => {
      let host = resume()?.ok_or_else(not_installed)?;
      let tags = scheduler.take_pending().await?;
      if tags.is_empty() {
        println!("No pending sync registrations");
      }
      for tag in tags {
        let result = host.fire_sync(&tag).await;
        let remaining = queue.list_all().await?.len();
        match result {
          Ok(()) if remaining == 0 => println!("{}: done", tag),
          Ok(()) => {
            scheduler.register(&tag).await?;
            println!("{}: {} mutation(s) still queued, will retry", tag, remaining);
          }
          Err(e) => {
            scheduler.register(&tag).await?;
            warn!(tag = %tag, error = %e, "Sync failed, registration kept");
            println!("{}: failed, will retry", tag);
          }
        }
      }
    }
    Command::Queue => {
      for mutation in queue.list_all().await? {
        println!(
          "{}\t{}\t{}\t{}",
          mutation.id,
          format_millis(mutation.enqueued_at),
          mutation.method,
          mutation.url
        );
      }
    }
    Command::Caches => {
      let active = storage.active()?;
      for name in storage.namespaces()? {
        let marker = if active.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{} {}\t{}", marker, name, storage.entry_count(&name)?);
      }
    }
  }

  Ok(())
}
