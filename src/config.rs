use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub unsplash: UnsplashConfig,
  #[serde(default)]
  pub paging: PagingSettings,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsplashConfig {
  #[serde(default = "default_url")]
  pub url: String,
}

impl Default for UnsplashConfig {
  fn default() -> Self {
    Self { url: default_url() }
  }
}

fn default_url() -> String {
  "https://api.unsplash.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingSettings {
  /// Items per remote page
  #[serde(default = "default_page_size")]
  pub page_size: usize,
  /// How close to a loaded edge the anchor may get before more is loaded
  /// (defaults to page_size)
  pub prefetch_distance: Option<usize>,
  /// Items read on the first load and after every invalidation
  /// (defaults to 3 * page_size)
  pub initial_load_size: Option<usize>,
  /// Treat a page with fewer than page_size items as the last one
  #[serde(default)]
  pub end_on_short_page: bool,
}

impl Default for PagingSettings {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      prefetch_distance: None,
      initial_load_size: None,
      end_on_short_page: false,
    }
  }
}

fn default_page_size() -> usize {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Database location (default: $XDG_DATA_HOME/pixpage/cache.db)
  pub path: Option<PathBuf>,
  /// Minutes after the last sync before browsing refreshes from the network
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      stale_minutes: default_stale_minutes(),
    }
  }
}

fn default_stale_minutes() -> i64 {
  60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pixpage.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pixpage/config.yaml
  ///
  /// Every field has a default, so no file at all is not an error.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pixpage.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pixpage").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.paging.page_size == 0 {
      return Err(eyre!("paging.page_size must be at least 1"));
    }
    if self.paging.initial_load_size == Some(0) {
      return Err(eyre!("paging.initial_load_size must be at least 1"));
    }
    Ok(())
  }

  /// Database path, either configured or in the user's data directory
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    Ok(Self::data_dir()?.join("cache.db"))
  }

  /// Directory for the cache database and log files
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pixpage"))
  }

  /// Get the Unsplash access key from environment variables.
  ///
  /// Checks PIXPAGE_ACCESS_KEY first, then UNSPLASH_ACCESS_KEY as fallback.
  pub fn get_access_key() -> Result<String> {
    std::env::var("PIXPAGE_ACCESS_KEY")
      .or_else(|_| std::env::var("UNSPLASH_ACCESS_KEY"))
      .map_err(|_| {
        eyre!(
          "Unsplash access key not found. Set PIXPAGE_ACCESS_KEY or UNSPLASH_ACCESS_KEY environment variable."
        )
      })
  }
}
