//! Query-driven pages straight from the network, never cached.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::unsplash::{Photo, PhotoSource};

use super::error::PagingError;
use super::source::{LoadParams, Page, PagingSource, PagingState};

/// Pages of search results for one query.
///
/// Keys are remote page numbers starting at 1.
pub struct SearchPagingSource<C> {
  client: Arc<C>,
  query: String,
  end_on_short_page: bool,
}

impl<C: PhotoSource> SearchPagingSource<C> {
  pub fn new(client: Arc<C>, query: impl Into<String>) -> Self {
    Self {
      client,
      query: query.into(),
      end_on_short_page: false,
    }
  }

  /// Stop at the first page holding fewer items than requested instead of
  /// waiting for an empty one.
  pub fn with_end_on_short_page(mut self, enabled: bool) -> Self {
    self.end_on_short_page = enabled;
    self
  }
}

#[async_trait]
impl<C: PhotoSource + 'static> PagingSource for SearchPagingSource<C> {
  type Key = u32;
  type Item = Photo;

  async fn load(&self, params: LoadParams<u32>) -> Result<Page<u32, Photo>, PagingError> {
    // Pages start at 1
    let page = params.key.unwrap_or(1).max(1);

    let photos = self
      .client
      .fetch_page(Some(&self.query), page, params.load_size)
      .await
      .map_err(|e| {
        warn!(query = %self.query, page, "search failed: {}", e);
        PagingError::Transport(e)
      })?;

    if photos.is_empty() {
      debug!(query = %self.query, page, "search exhausted");
      return Ok(Page::empty());
    }

    let last = self.end_on_short_page && photos.len() < params.load_size;
    debug!(query = %self.query, page, count = photos.len(), last, "search page loaded");

    Ok(Page {
      items: photos,
      prev_key: if page == 1 { None } else { Some(page - 1) },
      next_key: if last { None } else { Some(page + 1) },
      items_before: 0,
    })
  }

  /// The anchor position is handed back unchanged.
  fn refresh_key(&self, state: &PagingState<u32, Photo>) -> Option<u32> {
    state
      .anchor_position
      .and_then(|position| u32::try_from(position).ok())
  }
}
