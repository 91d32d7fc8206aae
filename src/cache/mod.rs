//! Local cache for paged remote data.
//!
//! This module provides the persistent half of the browse-all list:
//! - Stores entities in remote page order (page, then position in page)
//! - Keeps one continuation key per entity recording its batch's neighbours
//! - Applies every write inside a single SQLite transaction
//! - Notifies subscribers after each successful commit

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{Cacheable, ContinuationKey};
