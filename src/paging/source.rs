//! Shared contract between paging sources, the remote mediator and the pager.

use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::watch;

use super::error::PagingError;

/// Why a load was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadType {
  /// Replace everything, starting around the anchor
  Refresh,
  /// Extend the list backward, before the first item
  Prepend,
  /// Extend the list forward, after the last item
  Append,
}

/// Paging runtime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
  pub page_size: usize,
  pub prefetch_distance: usize,
  pub initial_load_size: usize,
}

impl PagingConfig {
  pub fn new(page_size: usize) -> Self {
    Self {
      page_size,
      prefetch_distance: page_size,
      initial_load_size: page_size * 3,
    }
  }

  pub fn with_prefetch_distance(mut self, distance: usize) -> Self {
    self.prefetch_distance = distance;
    self
  }

  pub fn with_initial_load_size(mut self, size: usize) -> Self {
    self.initial_load_size = size;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams<K> {
  pub load_type: LoadType,
  /// `None` only for a refresh without a refresh key
  pub key: Option<K>,
  pub load_size: usize,
}

/// One loaded page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<K, T> {
  pub items: Vec<T>,
  /// Key that loads the page before this one, `None` at the start
  pub prev_key: Option<K>,
  /// Key that loads the page after this one, `None` at the end
  pub next_key: Option<K>,
  /// Absolute position of the first item, when the source knows it
  pub items_before: usize,
}

impl<K, T> Page<K, T> {
  /// A page with no items and nothing on either side
  pub fn empty() -> Self {
    Self {
      items: Vec::new(),
      prev_key: None,
      next_key: None,
      items_before: 0,
    }
  }
}

/// What the consumer currently has materialized.
#[derive(Debug, Clone)]
pub struct PagingState<K, T> {
  pub pages: Vec<Page<K, T>>,
  /// Absolute position the consumer last accessed
  pub anchor_position: Option<usize>,
  /// Absolute position of the first materialized item
  pub leading_offset: usize,
  pub config: PagingConfig,
}

impl<K, T> PagingState<K, T> {
  pub fn new(config: PagingConfig) -> Self {
    Self {
      pages: Vec::new(),
      anchor_position: None,
      leading_offset: 0,
      config,
    }
  }

  pub fn item_count(&self) -> usize {
    self.pages.iter().map(|p| p.items.len()).sum()
  }

  pub fn first_item(&self) -> Option<&T> {
    self
      .pages
      .iter()
      .find(|p| !p.items.is_empty())
      .and_then(|p| p.items.first())
  }

  pub fn last_item(&self) -> Option<&T> {
    self
      .pages
      .iter()
      .rev()
      .find(|p| !p.items.is_empty())
      .and_then(|p| p.items.last())
  }

  /// The materialized item nearest to absolute `position`.
  pub fn closest_item_to_position(&self, position: usize) -> Option<&T> {
    let count = self.item_count();
    if count == 0 {
      return None;
    }

    let mut index = position.saturating_sub(self.leading_offset).min(count - 1);
    for page in &self.pages {
      if index < page.items.len() {
        return page.items.get(index);
      }
      index -= page.items.len();
    }

    None
  }

  /// Absolute position of the item [`closest_item_to_position`] returns.
  ///
  /// [`closest_item_to_position`]: PagingState::closest_item_to_position
  pub fn closest_position(&self, position: usize) -> Option<usize> {
    let count = self.item_count();
    if count == 0 {
      return None;
    }
    Some(self.leading_offset + position.saturating_sub(self.leading_offset).min(count - 1))
  }

  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|p| p.items.iter())
  }
}

impl<K, T: PartialEq> PagingState<K, T> {
  /// Absolute position of `item`, if it is materialized.
  pub fn position_of(&self, item: &T) -> Option<usize> {
    self
      .items()
      .position(|candidate| candidate == item)
      .map(|index| self.leading_offset + index)
  }
}

/// A source of pages keyed by `Key`.
#[async_trait]
pub trait PagingSource: Send + Sync {
  type Key: Clone + Debug + Send + Sync + 'static;
  type Item: Clone + PartialEq + Send + Sync + 'static;

  async fn load(
    &self,
    params: LoadParams<Self::Key>,
  ) -> Result<Page<Self::Key, Self::Item>, PagingError>;

  /// Key to restart from when the consumer refreshes or the source is invalidated.
  fn refresh_key(&self, state: &PagingState<Self::Key, Self::Item>) -> Option<Self::Key>;

  /// Notifications after which loaded pages are stale and must be reloaded.
  fn invalidations(&self) -> Option<watch::Receiver<u64>> {
    None
  }
}

/// What the pager should do before the first remote load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeAction {
  LaunchInitialRefresh,
  SkipInitialRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediatorResult {
  pub end_of_pagination: bool,
}

/// Refills a cache-backed source from the network.
#[async_trait]
pub trait RemoteMediator<K, T>: Send + Sync
where
  K: Send + Sync + 'static,
  T: Send + Sync + 'static,
{
  async fn initialize(&self) -> InitializeAction {
    InitializeAction::LaunchInitialRefresh
  }

  async fn load(
    &self,
    load_type: LoadType,
    state: &PagingState<K, T>,
  ) -> Result<MediatorResult, PagingError>;
}
