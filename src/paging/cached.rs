//! Pages read from the local cache by position.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::{Cacheable, SqliteStorage};

use super::error::PagingError;
use super::source::{LoadParams, LoadType, Page, PagingSource, PagingState};

/// Reads cached entities in stored order. Keys are absolute offsets:
/// an append key is the first offset to read, a prepend key is the offset
/// to read up to.
pub struct CachedPagingSource<T> {
  storage: Arc<SqliteStorage>,
  _entity: PhantomData<fn() -> T>,
}

impl<T: Cacheable> CachedPagingSource<T> {
  pub fn new(storage: Arc<SqliteStorage>) -> Self {
    Self {
      storage,
      _entity: PhantomData,
    }
  }
}

#[async_trait]
impl<T: Cacheable + PartialEq + 'static> PagingSource for CachedPagingSource<T> {
  type Key = usize;
  type Item = T;

  async fn load(&self, params: LoadParams<usize>) -> Result<Page<usize, T>, PagingError> {
    let size = params.load_size;
    let key = params.key.unwrap_or(0);

    let (count, start, items) = self
      .storage
      .read_window::<T, _>(|count| match params.load_type {
        // A key past the end (the cache shrank) still shows the tail
        LoadType::Refresh => (key.min(count.saturating_sub(size)), size),
        LoadType::Append => (key, size),
        LoadType::Prepend => {
          let end = key.min(count);
          let start = end.saturating_sub(size);
          (start, end - start)
        }
      })
      .map_err(PagingError::CacheRead)?;
    let end = start + items.len();

    Ok(Page {
      items,
      prev_key: (start > 0).then_some(start),
      next_key: (end < count).then_some(end),
      items_before: start,
    })
  }

  /// Centre the reloaded window on the anchor.
  fn refresh_key(&self, state: &PagingState<usize, T>) -> Option<usize> {
    state
      .anchor_position
      .map(|anchor| anchor.saturating_sub(state.config.initial_load_size / 2))
  }

  fn invalidations(&self) -> Option<watch::Receiver<u64>> {
    Some(self.storage.subscribe())
  }
}
