//! Scripted remote client for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::unsplash::{Photo, PhotoSource};

pub fn photo(id: &str) -> Photo {
  Photo {
    id: id.to_string(),
    url: format!("https://images.unsplash.com/{}", id),
    description: Some(format!("photo {}", id)),
    author: "tester".to_string(),
    likes: 1,
    width: 400,
    height: 300,
  }
}

/// `count` photos with ids `{prefix}-0`, `{prefix}-1`, ...
pub fn photos(prefix: &str, count: usize) -> Vec<Photo> {
  (0..count).map(|i| photo(&format!("{}-{}", prefix, i))).collect()
}

pub fn ids(photos: &[Photo]) -> Vec<String> {
  photos.iter().map(|p| p.id.clone()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
  pub query: Option<String>,
  pub page: u32,
  pub per_page: usize,
}

/// Serves pages from a table; missing pages come back empty.
#[derive(Default)]
pub struct FakePhotoSource {
  pages: Mutex<HashMap<(Option<String>, u32), Vec<Photo>>>,
  calls: Mutex<Vec<FetchCall>>,
  failing: AtomicBool,
  gate: Mutex<Option<Arc<Notify>>>,
}

impl FakePhotoSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_page(self, query: Option<&str>, page: u32, photos: Vec<Photo>) -> Self {
    self.set_page(query, page, photos);
    self
  }

  pub fn set_page(&self, query: Option<&str>, page: u32, photos: Vec<Photo>) {
    self
      .pages
      .lock()
      .unwrap()
      .insert((query.map(String::from), page), photos);
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Park every later fetch, after it is logged, until the returned gate
  /// is notified.
  pub fn hold(&self) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *self.gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  pub fn calls(&self) -> Vec<FetchCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn pages_fetched(&self) -> Vec<u32> {
    self.calls().into_iter().map(|c| c.page).collect()
  }
}

#[async_trait]
impl PhotoSource for FakePhotoSource {
  async fn fetch_page(
    &self,
    query: Option<&str>,
    page: u32,
    per_page: usize,
  ) -> Result<Vec<Photo>> {
    self.calls.lock().unwrap().push(FetchCall {
      query: query.map(String::from),
      page,
      per_page,
    });

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    if self.failing.load(Ordering::SeqCst) {
      return Err(eyre!("connection reset by peer"));
    }

    Ok(
      self
        .pages
        .lock()
        .unwrap()
        .get(&(query.map(String::from), page))
        .cloned()
        .unwrap_or_default(),
    )
  }
}
