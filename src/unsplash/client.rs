use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::unsplash::api_types::{ApiPhoto, ApiSearchResponse};
use crate::unsplash::types::Photo;

/// Paginated access to a remote photo collection.
///
/// `query = Some(..)` searches, `None` lists everything. An empty page means
/// there is nothing past it. Implementations are stateless.
#[async_trait]
pub trait PhotoSource: Send + Sync {
  async fn fetch_page(&self, query: Option<&str>, page: u32, per_page: usize)
    -> Result<Vec<Photo>>;
}

/// Unsplash API client wrapper
#[derive(Clone)]
pub struct UnsplashClient {
  http: reqwest::Client,
  base: Url,
}

impl UnsplashClient {
  pub fn new(config: &Config) -> Result<Self> {
    let access_key = Config::get_access_key()?;

    let mut headers = HeaderMap::new();
    headers.insert("Accept-Version", HeaderValue::from_static("v1"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let auth = HeaderValue::from_str(&format!("Client-ID {}", access_key))
      .map_err(|e| eyre!("Invalid access key: {}", e))?;
    headers.insert(AUTHORIZATION, auth);

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .user_agent(concat!("pixpage/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // join() replaces the last segment unless the base ends with a slash
    let mut raw = config.unsplash.url.clone();
    if !raw.ends_with('/') {
      raw.push('/');
    }
    let base = Url::parse(&raw).map_err(|e| eyre!("Invalid Unsplash URL {}: {}", raw, e))?;

    Ok(Self { http, base })
  }

  /// List all photos, newest first
  pub async fn list_photos(&self, page: u32, per_page: usize) -> Result<Vec<Photo>> {
    let url = self.endpoint("photos", &[
      ("page", page.to_string()),
      ("per_page", per_page.to_string()),
    ])?;

    let photos: Vec<ApiPhoto> = self.get_json(url).await?;
    Ok(photos.into_iter().map(Photo::from).collect())
  }

  /// Search photos matching `query`
  pub async fn search_photos(&self, query: &str, page: u32, per_page: usize) -> Result<Vec<Photo>> {
    let url = self.endpoint("search/photos", &[
      ("query", query.to_string()),
      ("page", page.to_string()),
      ("per_page", per_page.to_string()),
    ])?;

    let response: ApiSearchResponse = self.get_json(url).await?;
    debug!(
      query,
      page,
      total = response.total,
      total_pages = response.total_pages,
      "search page received"
    );

    Ok(response.results.into_iter().map(Photo::from).collect())
  }

  fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
    let mut url = self
      .base
      .join(path)
      .map_err(|e| eyre!("Failed to build URL for {}: {}", path, e))?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url.path(), e))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url.path(), e))?;

    if !status.is_success() {
      return Err(eyre!("Unsplash returned {} for {}: {}", status, url.path(), body));
    }

    serde_json::from_str(&body).map_err(|e| eyre!("Failed to parse response from {}: {}", url.path(), e))
  }
}

#[async_trait]
impl PhotoSource for UnsplashClient {
  async fn fetch_page(
    &self,
    query: Option<&str>,
    page: u32,
    per_page: usize,
  ) -> Result<Vec<Photo>> {
    match query {
      Some(q) => self.search_photos(q, page, per_page).await,
      None => self.list_photos(page, per_page).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client() -> UnsplashClient {
    UnsplashClient {
      http: reqwest::Client::new(),
      base: Url::parse("https://api.unsplash.com/").unwrap(),
    }
  }

  #[test]
  fn test_endpoint_encodes_query() {
    let url = client()
      .endpoint("search/photos", &[
        ("query", "snowy mountains".to_string()),
        ("page", "2".to_string()),
      ])
      .unwrap();

    assert_eq!(url.path(), "/search/photos");
    assert_eq!(url.query(), Some("query=snowy+mountains&page=2"));
  }
}
