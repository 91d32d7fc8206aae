//! Caching implementations for Unsplash types.

use crate::cache::Cacheable;

use super::types::Photo;

impl Cacheable for Photo {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "photo"
  }
}
