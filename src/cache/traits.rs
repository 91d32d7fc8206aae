//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Implementors must provide a unique cache key. The key is also how
/// continuation keys are looked up, so it must be stable across fetches.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity (e.g., photo id)
  fn cache_key(&self) -> String;

  /// Entity type name for storage organization (e.g., "photo")
  fn entity_type() -> &'static str;
}

/// Remote page linkage for one cached item.
///
/// Every item fetched in the same remote call shares the same `prev_page`
/// and `next_page`. `prev_page: None` marks page 1, `next_page: None` marks
/// the end of the remote list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationKey {
  pub item_id: String,
  pub prev_page: Option<u32>,
  pub next_page: Option<u32>,
  /// When the batch was merged (set by storage on write)
  pub cached_at: Option<DateTime<Utc>>,
}

impl ContinuationKey {
  pub fn new(item_id: impl Into<String>, prev_page: Option<u32>, next_page: Option<u32>) -> Self {
    Self {
      item_id: item_id.into(),
      prev_page,
      next_page,
      cached_at: None,
    }
  }
}
