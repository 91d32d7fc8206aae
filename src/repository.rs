//! Entry points for consumers: the cached photo feed and ephemeral search.

use chrono::Duration;
use color_eyre::Result;
use std::sync::Arc;

use crate::cache::SqliteStorage;
use crate::config::PagingSettings;
use crate::paging::cached::CachedPagingSource;
use crate::paging::mediator::PhotoRemoteMediator;
use crate::paging::search::SearchPagingSource;
use crate::paging::{Pager, PagingConfig, PagingStream};
use crate::unsplash::{Photo, PhotoSource};

pub struct Repository<C> {
  client: Arc<C>,
  storage: Arc<SqliteStorage>,
  paging: PagingConfig,
  end_on_short_page: bool,
  stale_time: Duration,
}

impl<C: PhotoSource + 'static> Repository<C> {
  pub fn new(client: Arc<C>, storage: Arc<SqliteStorage>, settings: &PagingSettings) -> Self {
    let mut paging = PagingConfig::new(settings.page_size);
    if let Some(distance) = settings.prefetch_distance {
      paging = paging.with_prefetch_distance(distance);
    }
    if let Some(size) = settings.initial_load_size {
      paging = paging.with_initial_load_size(size);
    }

    Self {
      client,
      storage,
      paging,
      end_on_short_page: settings.end_on_short_page,
      stale_time: Duration::minutes(60),
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// The full photo feed: read from the cache, refilled from the network.
  pub fn all_photos(&self) -> PagingStream<Photo> {
    let mediator =
      PhotoRemoteMediator::new(self.client.clone(), self.storage.clone(), self.paging.page_size)
        .with_end_on_short_page(self.end_on_short_page)
        .with_stale_time(self.stale_time);

    Pager::new(self.paging, CachedPagingSource::new(self.storage.clone()))
      .with_remote_mediator(mediator)
      .flow()
  }

  /// Photos matching `query`, straight from the network.
  pub fn search_photos(&self, query: &str) -> PagingStream<Photo> {
    // Page keys are page numbers, so every load must be the same size
    let config = self.paging.with_initial_load_size(self.paging.page_size);
    let source = SearchPagingSource::new(self.client.clone(), query)
      .with_end_on_short_page(self.end_on_short_page);

    Pager::new(config, source).flow()
  }
}

/// Drop every cached photo and continuation key.
pub fn clear_cache(storage: &SqliteStorage) -> Result<usize> {
  let count = storage.item_count::<Photo>()?;
  storage.run_atomic(|tx| {
    tx.delete_all_items::<Photo>()?;
    tx.delete_all_continuation_keys()
  })?;
  Ok(count)
}
