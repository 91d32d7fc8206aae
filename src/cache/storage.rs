//! SQLite cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::traits::{Cacheable, ContinuationKey};

/// SQLite-based cache storage implementation.
///
/// All writes go through [`SqliteStorage::run_atomic`]. Readers share the
/// same connection lock, so they observe either the state before a
/// transaction or the state after its commit.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  /// Bumped after every committed transaction
  commits: watch::Sender<u64>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private, non-persistent cache.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let (commits, _) = watch::channel(0);
    let storage = Self {
      conn: Mutex::new(conn),
      commits,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Subscribe to commit notifications.
  ///
  /// The receiver starts with the current commit marked as seen.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.commits.subscribe()
  }

  /// Run `body` inside one transaction.
  ///
  /// Commits when `body` returns `Ok`, rolls back otherwise. Subscribers are
  /// notified only after a successful commit.
  pub fn run_atomic<R, F>(&self, body: F) -> Result<R>
  where
    F: FnOnce(&CacheTransaction<'_>) -> Result<R>,
  {
    let value = {
      let mut conn = self.lock()?;

      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      let cache_tx = CacheTransaction { tx };

      // Dropping the transaction without commit rolls it back
      let value = body(&cache_tx)?;

      cache_tx
        .tx
        .commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      value
    };

    self.commits.send_modify(|version| *version += 1);

    Ok(value)
  }

  /// Read up to `limit` entities starting at `offset`, in page order.
  #[cfg(test)]
  pub fn read_items<T: Cacheable>(&self, offset: usize, limit: usize) -> Result<Vec<T>> {
    let conn = self.lock()?;
    select_items(&conn, offset, limit)
  }

  /// Number of cached entities of type `T`.
  pub fn item_count<T: Cacheable>(&self) -> Result<usize> {
    let conn = self.lock()?;
    count_items::<T>(&conn)
  }

  /// Count the entities, then read the `(offset, limit)` window that
  /// `window` picks for that count, without a commit in between.
  pub fn read_window<T, F>(&self, window: F) -> Result<(usize, usize, Vec<T>)>
  where
    T: Cacheable,
    F: FnOnce(usize) -> (usize, usize),
  {
    let conn = self.lock()?;

    let count = count_items::<T>(&conn)?;
    let (offset, limit) = window(count);
    let items = if limit == 0 {
      Vec::new()
    } else {
      select_items(&conn, offset, limit)?
    };

    Ok((count, offset, items))
  }

  /// Look up the continuation key of a cached item.
  pub fn continuation_key(&self, item_id: &str) -> Result<Option<ContinuationKey>> {
    let conn = self.lock()?;

    let row: Option<(Option<u32>, Option<u32>, String)> = conn
      .query_row(
        "SELECT prev_page, next_page, cached_at FROM continuation_keys WHERE item_id = ?",
        params![item_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up continuation key for {}: {}", item_id, e))?;

    match row {
      Some((prev_page, next_page, cached_at)) => Ok(Some(ContinuationKey {
        item_id: item_id.to_string(),
        prev_page,
        next_page,
        cached_at: Some(parse_datetime(&cached_at)?),
      })),
      None => Ok(None),
    }
  }

  /// When the most recent batch was merged, if anything is cached.
  pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;

    let latest: Option<String> = conn
      .query_row("SELECT MAX(cached_at) FROM continuation_keys", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to read last sync time: {}", e))?;

    latest.as_deref().map(parse_datetime).transpose()
  }

  #[cfg(test)]
  pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
    self.lock()?.execute_batch(sql)?;
    Ok(())
  }
}

fn select_items<T: Cacheable>(conn: &Connection, offset: usize, limit: usize) -> Result<Vec<T>> {
  let mut stmt = conn
    .prepare(
      "SELECT data FROM cached_items
       WHERE entity_type = ?
       ORDER BY page, position, rowid
       LIMIT ? OFFSET ?",
    )
    .map_err(|e| eyre!("Failed to prepare item query: {}", e))?;

  let rows = stmt
    .query_map(params![T::entity_type(), limit as i64, offset as i64], |row| {
      row.get::<_, Vec<u8>>(0)
    })
    .map_err(|e| eyre!("Failed to query items: {}", e))?;

  let mut items = Vec::new();
  for row in rows {
    let data = row.map_err(|e| eyre!("Failed to read item row: {}", e))?;
    let item: T =
      serde_json::from_slice(&data).map_err(|e| eyre!("Failed to deserialize item: {}", e))?;
    items.push(item);
  }

  Ok(items)
}

fn count_items<T: Cacheable>(conn: &Connection) -> Result<usize> {
  let count: i64 = conn
    .query_row(
      "SELECT COUNT(*) FROM cached_items WHERE entity_type = ?",
      params![T::entity_type()],
      |row| row.get(0),
    )
    .map_err(|e| eyre!("Failed to count items: {}", e))?;

  Ok(count as usize)
}

/// Write access handed to the body of [`SqliteStorage::run_atomic`].
pub struct CacheTransaction<'conn> {
  tx: Transaction<'conn>,
}

impl CacheTransaction<'_> {
  /// Insert or overwrite entities fetched from remote `page`, keeping their
  /// order within the page.
  pub fn upsert_items<T: Cacheable>(&self, page: u32, items: &[T]) -> Result<()> {
    let entity_type = T::entity_type();

    for (position, item) in items.iter().enumerate() {
      let data =
        serde_json::to_vec(item).map_err(|e| eyre!("Failed to serialize item: {}", e))?;

      self
        .tx
        .execute(
          "INSERT OR REPLACE INTO cached_items (entity_type, entity_key, data, page, position)
           VALUES (?, ?, ?, ?, ?)",
          params![entity_type, item.cache_key(), data, page, position as i64],
        )
        .map_err(|e| eyre!("Failed to store item: {}", e))?;
    }

    debug!(entity_type, page, count = items.len(), "items staged");
    Ok(())
  }

  /// Remove every cached entity of type `T`.
  pub fn delete_all_items<T: Cacheable>(&self) -> Result<()> {
    self
      .tx
      .execute(
        "DELETE FROM cached_items WHERE entity_type = ?",
        params![T::entity_type()],
      )
      .map_err(|e| eyre!("Failed to delete items: {}", e))?;
    Ok(())
  }

  /// Insert or overwrite continuation keys, stamping them with the current time.
  pub fn upsert_continuation_keys(&self, keys: &[ContinuationKey]) -> Result<()> {
    for key in keys {
      self
        .tx
        .execute(
          "INSERT OR REPLACE INTO continuation_keys (item_id, prev_page, next_page, cached_at)
           VALUES (?, ?, ?, datetime('now'))",
          params![key.item_id, key.prev_page, key.next_page],
        )
        .map_err(|e| eyre!("Failed to store continuation key for {}: {}", key.item_id, e))?;
    }
    Ok(())
  }

  pub fn delete_all_continuation_keys(&self) -> Result<()> {
    self
      .tx
      .execute("DELETE FROM continuation_keys", [])
      .map_err(|e| eyre!("Failed to delete continuation keys: {}", e))?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Cached entities (serialized JSON), ordered by remote page
CREATE TABLE IF NOT EXISTS cached_items (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    page INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (entity_type, entity_key)
);

CREATE INDEX IF NOT EXISTS idx_cached_items_order
    ON cached_items(entity_type, page, position);

-- Remote page linkage, one row per cached entity
CREATE TABLE IF NOT EXISTS continuation_keys (
    item_id TEXT PRIMARY KEY,
    prev_page INTEGER,
    next_page INTEGER,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
