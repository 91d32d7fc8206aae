//! Serde-deserializable types matching Unsplash API responses.
//!
//! Only the fields the app reads are declared; everything else in the JSON is
//! ignored. Missing fields fall back to their defaults.

use serde::Deserialize;

use super::types::Photo;

// ============================================================================
// Nested objects
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiUrls {
  #[serde(default)]
  pub regular: String,
  #[serde(default)]
  pub small: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiUser {
  #[serde(default)]
  pub username: String,
  pub name: Option<String>,
}

// ============================================================================
// Photo - returned by both the list and the search endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPhoto {
  pub id: String,
  #[serde(default)]
  pub urls: ApiUrls,
  pub description: Option<String>,
  pub alt_description: Option<String>,
  #[serde(default)]
  pub user: ApiUser,
  #[serde(default)]
  pub likes: u32,
  #[serde(default)]
  pub width: u32,
  #[serde(default)]
  pub height: u32,
}

/// Response of `/search/photos`
#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub total_pages: u32,
  #[serde(default)]
  pub results: Vec<ApiPhoto>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiPhoto> for Photo {
  fn from(p: ApiPhoto) -> Self {
    let url = if p.urls.regular.is_empty() {
      p.urls.small
    } else {
      p.urls.regular
    };
    Photo {
      id: p.id,
      url,
      // Many uploads only carry the generated alt text
      description: p.description.or(p.alt_description),
      author: p.user.name.unwrap_or(p.user.username),
      likes: p.likes,
      width: p.width,
      height: p.height,
    }
  }
}
