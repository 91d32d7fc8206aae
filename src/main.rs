mod cache;
mod config;
mod paging;
mod repository;
mod unsplash;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::SqliteStorage;
use crate::paging::PagingStream;
use crate::repository::Repository;
use crate::unsplash::{Photo, UnsplashClient};

#[derive(Parser, Debug)]
#[command(name = "pixpage")]
#[command(about = "Infinite-scroll photo browser for Unsplash with an offline cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pixpage/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Retry a failed load this many times before giving up
  #[arg(long, global = true, default_value_t = 0)]
  retries: usize,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Browse the photo feed, served from the cache and refilled from Unsplash
  Browse {
    /// Number of pages to print
    #[arg(short, long, default_value_t = 3)]
    pages: usize,

    /// Reload the feed from the network even if the cache is fresh
    #[arg(short, long)]
    refresh: bool,
  },
  /// Search photos (never cached)
  Search {
    query: String,

    /// Number of pages to print
    #[arg(short, long, default_value_t = 1)]
    pages: usize,
  },
  /// Delete every cached photo
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Log to a file; stdout carries the listing
  let log_dir = config::Config::data_dir()?;
  let (writer, _guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "pixpage.log"));
  let level = std::env::var("PIXPAGE_LOG").unwrap_or_else(|_| "info".to_string());
  let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  let storage = Arc::new(SqliteStorage::open(&config.cache_path()?)?);
  let page_size = config.paging.page_size;

  match args.command {
    Command::Browse { pages, refresh } => {
      info!(pages, refresh, "browsing feed");
      let stream = build_repository(&config, storage)?.all_photos();
      if refresh {
        stream.controller().refresh();
      }
      print_photos(stream, pages * page_size, args.retries).await?;
    }
    Command::Search { query, pages } => {
      info!(%query, pages, "searching");
      let stream = build_repository(&config, storage)?.search_photos(&query);
      print_photos(stream, pages * page_size, args.retries).await?;
    }
    Command::Clear => {
      let count = repository::clear_cache(&storage)?;
      println!("Removed {} cached photos", count);
    }
  }

  Ok(())
}

fn build_repository(
  config: &config::Config,
  storage: Arc<SqliteStorage>,
) -> Result<Repository<UnsplashClient>> {
  let client = Arc::new(UnsplashClient::new(config)?);

  Ok(
    Repository::new(client, storage, &config.paging)
      .with_stale_time(chrono::Duration::minutes(config.cache.stale_minutes)),
  )
}

/// How long the listing waits for a pager that has gone quiet
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Print photos in order, scrolling forward until `limit` are shown or the
/// list ends.
async fn print_photos(
  stream: PagingStream<Photo>,
  limit: usize,
  mut retries: usize,
) -> Result<()> {
  let controller = stream.controller();
  let mut data = stream.snapshot();
  let mut snapshots = std::pin::pin!(stream.into_stream());
  let mut printed = 0;
  let mut last_access = None;

  loop {
    let states = &data.load_states;

    for (index, photo) in data.items.iter().enumerate() {
      let position = data.items_before + index;
      if position == printed && position < limit {
        print_photo(position, photo);
        printed += 1;
      }
    }

    if let Some(e) = states.error() {
      if retries == 0 {
        return Err(eyre!("Failed to load photos: {}", e));
      }
      retries -= 1;
      warn!(retries, "load failed, retrying: {}", e);
      controller.retry();
    }
    if printed >= limit {
      break;
    }
    if !states.is_loading() {
      if states.append_exhausted() && printed >= data.items_before + data.items.len() {
        if printed == 0 {
          println!("No photos found");
        }
        break;
      }

      // Scroll to the last printed photo
      let anchor = printed.saturating_sub(1);
      if last_access != Some(anchor) {
        controller.access(anchor);
        last_access = Some(anchor);
      }
    }

    data = match tokio::time::timeout(IDLE_TIMEOUT, snapshots.next()).await {
      Ok(Some(next)) => next,
      Ok(None) => break,
      Err(_) => {
        warn!(printed, "no more photos arriving");
        break;
      }
    };
  }

  Ok(())
}

fn print_photo(position: usize, photo: &Photo) {
  println!(
    "{:>4}  {}  by {} ({} likes, {}x{})",
    position + 1,
    photo.id,
    photo.author,
    photo.likes,
    photo.width,
    photo.height
  );
  if let Some(description) = &photo.description {
    println!("      {}", description);
  }
  println!("      {}", photo.url);
}
