use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Engine configuration, built once and handed to every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the controlled pages are served from
  pub origin: String,
  /// Versioned cache namespace name. Bumping it retires every older namespace
  /// at the next activation.
  pub cache_name: String,
  /// Requests whose path contains this prefix are routed network-first
  pub api_prefix: String,
  /// Root-relative path of the page served to failed navigations
  pub offline_page: String,
  /// Root-relative paths fetched into the cache at install time
  pub precache: Vec<String>,
  /// Tag of the deferred sync registration that drains the mutation queue
  pub sync_tag: String,
  /// SQLite database holding caches and queued mutations
  pub database: Option<PathBuf>,
}

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: DEFAULT_ORIGIN.to_string(),
      cache_name: "permits-cache-v1".to_string(),
      api_prefix: "/api/".to_string(),
      offline_page: "/offline.html".to_string(),
      precache: [
        "/",
        "/offline.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
        "/static/css/main.css",
        "/static/js/main.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      sync_tag: "sync-mutations".to_string(),
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./permit-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/permit-offline/config.yaml
  /// 4. Built-in defaults
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("permit-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("permit-offline").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  /// Parsed origin. Fails unless it is an absolute URL that can carry paths.
  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if url.cannot_be_a_base() {
      return Err(eyre!("origin must be an absolute http(s) URL: {}", self.origin));
    }
    Ok(url)
  }

  /// Resolve a root-relative path (or an absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<String> {
    self
      .origin_url()?
      .join(path)
      .map(String::from)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.origin, e))
  }

  /// URL of the offline fallback page.
  pub fn offline_url(&self) -> Result<String> {
    self.resolve(&self.offline_page)
  }

  /// Whether a request path belongs to the data API.
  pub fn is_api_path(&self, path: &str) -> bool {
    path.contains(&self.api_prefix)
  }

  /// Database location, defaulting to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("permit-offline").join("offline.db"))
  }
}
