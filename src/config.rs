use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::{Origin, Url};

use crate::cache::CacheVersion;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  /// Paths fetched and stored during install, relative to the app origin
  pub precache: Vec<String>,
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Namespace prefix
  pub name: String,
  /// Bumped on deploy; older namespaces are evicted on the next activation
  pub version: u32,
  pub origin: Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
  pub offline_page: String,
  pub placeholder_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to the user data directory)
  pub path: Option<PathBuf>,
  pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
  /// Activate right after install instead of waiting for an explicit trigger
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  /// Take control of already registered clients on activation
  #[serde(default = "default_true")]
  pub claim_clients: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      skip_waiting: true,
      claim_clients: true,
    }
  }
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-cache/config.yaml
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/offline-cache/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    if let Some(origin) = Self::origin_override()? {
      config.app.origin = origin;
    }
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  /// Get the app origin override from the environment.
  ///
  /// Checks OFFLINE_CACHE_ORIGIN.
  pub fn origin_override() -> Result<Option<Url>> {
    match std::env::var("OFFLINE_CACHE_ORIGIN") {
      Ok(value) => Url::parse(&value)
        .map(Some)
        .map_err(|e| eyre!("Invalid OFFLINE_CACHE_ORIGIN '{}': {}", value, e)),
      Err(_) => Ok(None),
    }
  }

  /// Check the invariants the engine relies on.
  pub fn validate(&self) -> Result<()> {
    if self.app.name.is_empty() {
      return Err(eyre!("app.name must not be empty"));
    }
    if !self.app.origin.origin().is_tuple() {
      return Err(eyre!("app.origin must be an http(s) URL: {}", self.app.origin));
    }

    let manifest = self.precache_urls()?;
    let offline = self.offline_page_url()?;
    if !manifest.contains(&offline) {
      tracing::warn!(url = %offline, "offline page is not in the precache manifest");
    }
    if let Some(placeholder) = self.placeholder_url()? {
      if !manifest.contains(&placeholder) {
        tracing::warn!(url = %placeholder, "placeholder image is not in the precache manifest");
      }
    }

    Ok(())
  }

  pub fn version(&self) -> CacheVersion {
    CacheVersion::new(self.app.name.clone(), self.app.version)
  }

  pub fn origin(&self) -> Origin {
    self.app.origin.origin()
  }

  /// Resolve a path from the config against the app origin.
  ///
  /// Anything that lands on another origin is rejected.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    let url = self
      .app
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))?;

    if url.origin() != self.origin() {
      return Err(eyre!("'{}' resolves outside the app origin ({})", path, url));
    }
    Ok(url)
  }

  /// The precache manifest in declaration order.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    self.precache.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn offline_page_url(&self) -> Result<Url> {
    self.resolve(&self.fallback.offline_page)
  }

  pub fn placeholder_url(&self) -> Result<Option<Url>> {
    self
      .fallback
      .placeholder_image
      .as_deref()
      .map(|p| self.resolve(p))
      .transpose()
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) const EXAMPLE: &str = r#"
app:
  name: ai-life-companion
  version: 1
  origin: http://localhost:3000
precache:
  - /
  - /offline
  - /manifest.json
  - /icon.svg
fallback:
  offline_page: /offline
  placeholder_image: /icon.svg
"#;

  pub(crate) fn example() -> Config {
    Config::parse(EXAMPLE).unwrap()
  }

  #[test]
  fn test_defaults() {
    let config = example();
    assert_eq!(config.network.timeout_secs, 10);
    assert!(config.lifecycle.skip_waiting);
    assert!(config.lifecycle.claim_clients);
    assert!(config.storage.path.is_none());
    assert!(config.storage.quota_bytes.is_none());
  }

  #[test]
  fn test_version_namespace() {
    assert_eq!(
      example().version().namespace().as_str(),
      "ai-life-companion-v1"
    );
  }

  #[test]
  fn test_precache_urls_keep_order() {
    let urls: Vec<String> = example()
      .precache_urls()
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(
      urls,
      vec![
        "http://localhost:3000/",
        "http://localhost:3000/offline",
        "http://localhost:3000/manifest.json",
        "http://localhost:3000/icon.svg",
      ]
    );
  }

  #[test]
  fn test_resolve_rejects_other_origin() {
    let config = example();
    assert!(config.resolve("https://cdn.example.com/app.js").is_err());
    assert!(config.resolve("//evil.example.com/x").is_err());
    assert!(config.resolve("/journal").is_ok());
  }

  #[test]
  fn test_validate_rejects_foreign_manifest_entry() {
    let mut config = example();
    config.precache.push("http://localhost:8000/api".to_string());
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_lifecycle_overrides() {
    let yaml = format!("{}lifecycle:\n  skip_waiting: false\n", EXAMPLE);
    let config = Config::parse(&yaml).unwrap();
    assert!(!config.lifecycle.skip_waiting);
    assert!(config.lifecycle.claim_clients);
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
