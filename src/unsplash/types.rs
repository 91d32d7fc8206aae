use serde::{Deserialize, Serialize};

/// A photo as shown in list views and stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
  pub id: String,
  /// Display URL (the "regular" rendition)
  pub url: String,
  pub description: Option<String>,
  pub author: String,
  pub likes: u32,
  pub width: u32,
  pub height: u32,
}
