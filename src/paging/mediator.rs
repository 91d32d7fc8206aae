//! Keeps the cached photo list in step with the remote listing.
//!
//! Each cached photo carries a [`ContinuationKey`] naming the remote pages
//! around the batch it arrived in. The mediator resolves a load type to a
//! remote page through those keys, fetches it, and merges the batch into the
//! cache in one transaction.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{Cacheable, ContinuationKey, SqliteStorage};
use crate::unsplash::{Photo, PhotoSource};

use super::error::PagingError;
use super::source::{InitializeAction, LoadType, MediatorResult, PagingState, RemoteMediator};

/// Outcome of resolving which page a load needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
  Fetch(u32),
  /// Nothing to fetch; report success with this end-of-pagination flag
  Done(bool),
}

pub struct PhotoRemoteMediator<C> {
  client: Arc<C>,
  storage: Arc<SqliteStorage>,
  page_size: usize,
  end_on_short_page: bool,
  /// How long after the last sync the cache is still served without a refresh
  stale_time: Duration,
}

impl<C: PhotoSource> PhotoRemoteMediator<C> {
  pub fn new(client: Arc<C>, storage: Arc<SqliteStorage>, page_size: usize) -> Self {
    Self {
      client,
      storage,
      page_size,
      end_on_short_page: false,
      stale_time: Duration::minutes(60),
    }
  }

  pub fn with_end_on_short_page(mut self, enabled: bool) -> Self {
    self.end_on_short_page = enabled;
    self
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn key_for(&self, photo: &Photo) -> Result<Option<ContinuationKey>, PagingError> {
    self
      .storage
      .continuation_key(&photo.cache_key())
      .map_err(PagingError::CacheRead)
  }

  fn resolve(
    &self,
    load_type: LoadType,
    state: &PagingState<usize, Photo>,
  ) -> Result<Target, PagingError> {
    match load_type {
      LoadType::Refresh => {
        let key = match state
          .anchor_position
          .and_then(|position| state.closest_item_to_position(position))
        {
          Some(photo) => self.key_for(photo)?,
          None => None,
        };
        if let Some(k) = &key {
          debug!(
            item = %k.item_id,
            next_page = ?k.next_page,
            cached_at = ?k.cached_at,
            "refresh anchored"
          );
        }
        // Re-fetch the page the anchor sits on
        let page = key
          .and_then(|k| k.next_page)
          .map(|next| next.saturating_sub(1).max(1))
          .unwrap_or(1);
        Ok(Target::Fetch(page))
      }
      LoadType::Prepend => {
        // Nothing materialized yet: the refresh has not landed
        let Some(first) = state.first_item() else {
          return Ok(Target::Done(false));
        };
        match self.key_for(first)? {
          None => Ok(Target::Done(false)),
          Some(key) => Ok(key.prev_page.map_or(Target::Done(true), Target::Fetch)),
        }
      }
      LoadType::Append => {
        let Some(last) = state.last_item() else {
          return Ok(Target::Done(false));
        };
        match self.key_for(last)? {
          None => Ok(Target::Done(false)),
          Some(key) => Ok(key.next_page.map_or(Target::Done(true), Target::Fetch)),
        }
      }
    }
  }

  /// Write one fetched batch. A refresh replaces everything.
  fn merge(
    &self,
    load_type: LoadType,
    page: u32,
    photos: &[Photo],
    end_of_pagination: bool,
  ) -> Result<(), PagingError> {
    let prev_page = if page == 1 { None } else { Some(page - 1) };
    let next_page = if end_of_pagination { None } else { Some(page + 1) };

    let keys: Vec<ContinuationKey> = photos
      .iter()
      .map(|photo| ContinuationKey::new(photo.cache_key(), prev_page, next_page))
      .collect();

    self
      .storage
      .run_atomic(|tx| {
        if load_type == LoadType::Refresh {
          tx.delete_all_items::<Photo>()?;
          tx.delete_all_continuation_keys()?;
        }
        tx.upsert_continuation_keys(&keys)?;
        tx.upsert_items(page, photos)
      })
      .map_err(|e| {
        warn!(?load_type, page, "merge rolled back: {}", e);
        PagingError::CacheTransaction(e)
      })
  }
}

#[async_trait]
impl<C: PhotoSource + 'static> RemoteMediator<usize, Photo> for PhotoRemoteMediator<C> {
  async fn initialize(&self) -> InitializeAction {
    match self.storage.last_synced_at() {
      Ok(Some(synced_at)) if Utc::now() - synced_at <= self.stale_time => {
        debug!(%synced_at, "cache is fresh, skipping initial refresh");
        InitializeAction::SkipInitialRefresh
      }
      Ok(_) => InitializeAction::LaunchInitialRefresh,
      Err(e) => {
        warn!("could not read last sync time: {}", e);
        InitializeAction::LaunchInitialRefresh
      }
    }
  }

  async fn load(
    &self,
    load_type: LoadType,
    state: &PagingState<usize, Photo>,
  ) -> Result<MediatorResult, PagingError> {
    let page = match self.resolve(load_type, state)? {
      Target::Fetch(page) => page,
      Target::Done(end_of_pagination) => {
        debug!(?load_type, end_of_pagination, "nothing to fetch");
        return Ok(MediatorResult { end_of_pagination });
      }
    };

    debug!(?load_type, page, "fetching remote page");
    let photos = self
      .client
      .fetch_page(None, page, self.page_size)
      .await
      .map_err(|e| {
        warn!(?load_type, page, "fetch failed: {}", e);
        PagingError::Transport(e)
      })?;

    let end_of_pagination =
      photos.is_empty() || (self.end_on_short_page && photos.len() < self.page_size);

    self.merge(load_type, page, &photos, end_of_pagination)?;
    info!(
      ?load_type,
      page,
      count = photos.len(),
      end_of_pagination,
      "remote page merged"
    );

    Ok(MediatorResult { end_of_pagination })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::paging::source::Page;
  use crate::paging::testing::{ids, photos, FakePhotoSource};
  use crate::paging::PagingConfig;

  struct Fixture {
    client: Arc<FakePhotoSource>,
    storage: Arc<SqliteStorage>,
    mediator: PhotoRemoteMediator<FakePhotoSource>,
  }

  fn fixture(client: FakePhotoSource) -> Fixture {
    let client = Arc::new(client);
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let mediator = PhotoRemoteMediator::new(client.clone(), storage.clone(), 10);
    Fixture {
      client,
      storage,
      mediator,
    }
  }

  /// What a consumer would have materialized after reading the whole cache
  fn state_from(storage: &SqliteStorage, anchor: Option<usize>) -> PagingState<usize, Photo> {
    let mut state = PagingState::new(PagingConfig::new(10));
    let items: Vec<Photo> = storage.read_items(0, 1000).unwrap();
    state.pages = vec![Page {
      items,
      prev_key: None,
      next_key: None,
      items_before: 0,
    }];
    state.anchor_position = anchor;
    state
  }

  fn empty_state() -> PagingState<usize, Photo> {
    PagingState::new(PagingConfig::new(10))
  }

  fn cached(storage: &SqliteStorage) -> Vec<String> {
    let items: Vec<Photo> = storage.read_items(0, 1000).unwrap();
    ids(&items)
  }

  fn key(storage: &SqliteStorage, id: &str) -> (Option<u32>, Option<u32>) {
    let key = storage.continuation_key(id).unwrap().unwrap();
    (key.prev_page, key.next_page)
  }

  #[tokio::test]
  async fn test_initial_refresh_stores_page_one() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));

    let result = f
      .mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    assert!(!result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![1]);
    assert_eq!(f.client.calls()[0].query, None);
    assert_eq!(f.client.calls()[0].per_page, 10);
    assert_eq!(cached(&f.storage), ids(&photos("a", 10)));
    for photo in photos("a", 10) {
      assert_eq!(key(&f.storage, &photo.id), (None, Some(2)));
    }
  }

  #[tokio::test]
  async fn test_append_links_batch_to_previous_page() {
    let f = fixture(
      FakePhotoSource::new()
        .with_page(None, 1, photos("a", 10))
        .with_page(None, 2, photos("b", 4)),
    );
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Append, &state).await.unwrap();

    // A short page is only the end when the next one comes back empty
    assert!(!result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![1, 2]);
    assert_eq!(key(&f.storage, "b-0"), (Some(1), Some(3)));
    assert_eq!(key(&f.storage, "b-3"), (Some(1), Some(3)));
    assert_eq!(key(&f.storage, "a-0"), (None, Some(2)));
    assert_eq!(f.storage.item_count::<Photo>().unwrap(), 14);
  }

  #[tokio::test]
  async fn test_short_page_ends_pagination_when_enabled() {
    let mut f = fixture(
      FakePhotoSource::new()
        .with_page(None, 1, photos("a", 10))
        .with_page(None, 2, photos("b", 4)),
    );
    f.mediator = PhotoRemoteMediator::new(f.client.clone(), f.storage.clone(), 10)
      .with_end_on_short_page(true);

    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();
    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Append, &state).await.unwrap();

    assert!(result.end_of_pagination);
    for photo in photos("b", 4) {
      assert_eq!(key(&f.storage, &photo.id), (Some(1), None));
    }
  }

  #[tokio::test]
  async fn test_empty_page_ends_pagination() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Append, &state).await.unwrap();

    assert!(result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![1, 2]);
    assert_eq!(f.storage.item_count::<Photo>().unwrap(), 10);
  }

  #[tokio::test]
  async fn test_append_after_last_page_short_circuits() {
    let f = fixture(FakePhotoSource::new());
    f.storage
      .run_atomic(|tx| {
        tx.upsert_items(3, &photos("c", 2))?;
        tx.upsert_continuation_keys(&[
          ContinuationKey::new("c-0", Some(2), None),
          ContinuationKey::new("c-1", Some(2), None),
        ])
      })
      .unwrap();

    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Append, &state).await.unwrap();

    assert!(result.end_of_pagination);
    assert!(f.client.calls().is_empty());
  }

  #[tokio::test]
  async fn test_prepend_at_first_page_short_circuits() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Prepend, &state).await.unwrap();

    assert!(result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![1]);
  }

  #[tokio::test]
  async fn test_prepend_without_items_is_incomplete() {
    let f = fixture(FakePhotoSource::new());

    let result = f
      .mediator
      .load(LoadType::Prepend, &empty_state())
      .await
      .unwrap();

    assert!(!result.end_of_pagination);
    assert!(f.client.calls().is_empty());
  }

  #[tokio::test]
  async fn test_item_without_key_is_incomplete() {
    let f = fixture(FakePhotoSource::new());
    f.storage
      .run_atomic(|tx| tx.upsert_items(1, &photos("x", 3)))
      .unwrap();

    let state = state_from(&f.storage, None);
    let append = f.mediator.load(LoadType::Append, &state).await.unwrap();
    let prepend = f.mediator.load(LoadType::Prepend, &state).await.unwrap();

    assert!(!append.end_of_pagination);
    assert!(!prepend.end_of_pagination);
    assert!(f.client.calls().is_empty());
  }

  #[tokio::test]
  async fn test_prepend_fetches_previous_page_and_sorts_it_first() {
    let f = fixture(FakePhotoSource::new().with_page(None, 3, photos("c", 10)));
    f.storage
      .run_atomic(|tx| {
        tx.upsert_items(4, &photos("d", 2))?;
        tx.upsert_continuation_keys(&[
          ContinuationKey::new("d-0", Some(3), Some(5)),
          ContinuationKey::new("d-1", Some(3), Some(5)),
        ])
      })
      .unwrap();

    let state = state_from(&f.storage, None);
    let result = f.mediator.load(LoadType::Prepend, &state).await.unwrap();

    assert!(!result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![3]);
    assert_eq!(key(&f.storage, "c-0"), (Some(2), Some(4)));
    assert_eq!(cached(&f.storage)[0], "c-0");
    assert_eq!(cached(&f.storage)[10], "d-0");
  }

  #[tokio::test]
  async fn test_refresh_targets_anchor_page_and_replaces_cache() {
    let f = fixture(FakePhotoSource::new().with_page(None, 4, photos("fresh", 10)));
    f.storage
      .run_atomic(|tx| {
        tx.upsert_items(3, &photos("old3", 10))?;
        tx.upsert_items(4, &photos("x", 10))?;
        let mut keys: Vec<ContinuationKey> = photos("old3", 10)
          .iter()
          .map(|p| ContinuationKey::new(p.id.clone(), Some(2), Some(4)))
          .collect();
        keys.extend(
          photos("x", 10)
            .iter()
            .map(|p| ContinuationKey::new(p.id.clone(), Some(3), Some(5))),
        );
        tx.upsert_continuation_keys(&keys)
      })
      .unwrap();

    // Anchor sits on item x-5, whose batch continues at page 5
    let state = state_from(&f.storage, Some(15));
    let result = f.mediator.load(LoadType::Refresh, &state).await.unwrap();

    assert!(!result.end_of_pagination);
    assert_eq!(f.client.pages_fetched(), vec![4]);
    assert_eq!(cached(&f.storage), ids(&photos("fresh", 10)));
    assert!(f.storage.continuation_key("x-5").unwrap().is_none());
    assert!(f.storage.continuation_key("old3-0").unwrap().is_none());
    assert_eq!(key(&f.storage, "fresh-0"), (Some(3), Some(5)));
  }

  #[tokio::test]
  async fn test_failed_refresh_leaves_cache_untouched() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    f.client.set_failing(true);
    let state = state_from(&f.storage, Some(0));
    let result = f.mediator.load(LoadType::Refresh, &state).await;

    assert!(matches!(result, Err(PagingError::Transport(_))));
    assert_eq!(cached(&f.storage), ids(&photos("a", 10)));
    assert_eq!(key(&f.storage, "a-3"), (None, Some(2)));
  }

  #[tokio::test]
  async fn test_failed_write_rolls_back_refresh() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    let mut poisoned = photos("b", 5);
    poisoned.push(crate::paging::testing::photo("poison"));
    f.client.set_page(None, 1, poisoned);
    f.storage
      .execute_batch(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON cached_items
         WHEN NEW.entity_key = 'poison'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
      )
      .unwrap();

    let state = state_from(&f.storage, Some(0));
    let result = f.mediator.load(LoadType::Refresh, &state).await;

    assert!(matches!(result, Err(PagingError::CacheTransaction(_))));
    // Neither the delete nor the partial insert survived
    assert_eq!(cached(&f.storage), ids(&photos("a", 10)));
    assert_eq!(key(&f.storage, "a-0"), (None, Some(2)));
    assert!(f.storage.continuation_key("b-0").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_empty_refresh_clears_cache() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    f.client.set_page(None, 1, Vec::new());
    let result = f
      .mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    assert!(result.end_of_pagination);
    assert_eq!(f.storage.item_count::<Photo>().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_overlapping_batches_take_latest_keys() {
    // Known simplification: an item fetched again in a later batch takes
    // that batch's keys, even if the page size changed in between.
    let f = fixture(
      FakePhotoSource::new()
        .with_page(None, 1, photos("a", 10))
        .with_page(None, 2, photos("a", 10)[5..].to_vec()),
    );
    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();

    let state = state_from(&f.storage, None);
    f.mediator.load(LoadType::Append, &state).await.unwrap();

    assert_eq!(key(&f.storage, "a-4"), (None, Some(2)));
    assert_eq!(key(&f.storage, "a-5"), (Some(1), Some(3)));
    assert_eq!(f.storage.item_count::<Photo>().unwrap(), 10);
  }

  #[tokio::test]
  async fn test_initialize_skips_refresh_for_fresh_cache() {
    let f = fixture(FakePhotoSource::new().with_page(None, 1, photos("a", 10)));
    assert_eq!(
      f.mediator.initialize().await,
      InitializeAction::LaunchInitialRefresh
    );

    f.mediator
      .load(LoadType::Refresh, &empty_state())
      .await
      .unwrap();
    assert_eq!(
      f.mediator.initialize().await,
      InitializeAction::SkipInitialRefresh
    );

    let stale = PhotoRemoteMediator::new(f.client.clone(), f.storage.clone(), 10)
      .with_stale_time(Duration::seconds(-1));
    assert_eq!(stale.initialize().await, InitializeAction::LaunchInitialRefresh);
  }
}
