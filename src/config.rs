use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker is registered for; only same-origin requests are handled
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      storage: StorageConfig::default(),
    }
  }
}

/// How static assets are served once classified.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StaticStrategy {
  /// Serve a hit as-is; fetch and store only on a miss
  #[default]
  CacheFirst,
  /// Serve a hit and refresh the entry in the background
  StaleWhileRevalidate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Bump on every deployment; stale buckets are purged on activate
  #[serde(default = "default_generation_tag")]
  pub generation_tag: String,
  /// Paths under this prefix are treated as static assets
  #[serde(default = "default_static_prefix")]
  pub static_prefix: String,
  /// Pre-cached on install, in order
  #[serde(default = "default_static_assets")]
  pub static_assets: Vec<String>,
  #[serde(default)]
  pub strategy: StaticStrategy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation_tag: default_generation_tag(),
      static_prefix: default_static_prefix(),
      static_assets: default_static_assets(),
      strategy: StaticStrategy::default(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

fn default_origin() -> String {
  "http://localhost:5001".to_string()
}

fn default_generation_tag() -> String {
  "limoney-v3".to_string()
}

fn default_static_prefix() -> String {
  "/static/".to_string()
}

fn default_static_assets() -> Vec<String> {
  [
    "/static/design.css",
    "/static/manifest.json",
    "/static/icons/icon-192.png",
    "/static/icons/icon-512.png",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./limoney-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/limoney-sw/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("limoney-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("limoney-sw").join("config.yaml");
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
    Ok(config)
  }

  /// Parsed origin URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if url.host_str().is_none() {
      return Err(eyre!("origin must include a host: {}", self.origin));
    }
    Ok(url)
  }

  /// Reject settings the worker cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.cache.generation_tag.trim().is_empty() {
      return Err(eyre!("cache.generation_tag must not be empty"));
    }
    let origin = self.origin_url()?;
    if !self.cache.static_prefix.starts_with('/') {
      return Err(eyre!(
        "cache.static_prefix must start with '/': {}",
        self.cache.static_prefix
      ));
    }
    for asset in &self.cache.static_assets {
      origin
        .join(asset)
        .map_err(|e| eyre!("Invalid static asset path {}: {}", asset, e))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache.generation_tag, "limoney-v3");
    assert_eq!(config.cache.static_prefix, "/static/");
    assert_eq!(config.cache.static_assets.len(), 4);
    assert_eq!(config.cache.strategy, StaticStrategy::CacheFirst);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
cache:
  generation_tag: limoney-v4
  strategy: stale-while-revalidate
"#,
    )
    .unwrap();
    assert_eq!(config.cache.generation_tag, "limoney-v4");
    assert_eq!(config.cache.strategy, StaticStrategy::StaleWhileRevalidate);
    assert_eq!(config.cache.static_prefix, "/static/");
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:5001/");
  }

  #[test]
  fn test_asset_list_from_yaml() {
    let config = Config::from_yaml(
      r#"
origin: "https://limoney.example"
cache:
  static_assets: ["/static/a.css"]
storage:
  path: /tmp/cache.db
"#,
    )
    .unwrap();
    assert_eq!(config.cache.static_assets, vec!["/static/a.css"]);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/cache.db")));
    assert_eq!(config.origin_url().unwrap().host_str(), Some("limoney.example"));
  }

  #[test]
  fn test_validate_rejects_empty_tag() {
    let mut config = Config::default();
    config.cache.generation_tag = "  ".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_validate_rejects_bad_origin() {
    let mut config = Config::default();
    config.origin = "not a url".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_validate_rejects_relative_prefix() {
    let mut config = Config::default();
    config.cache.static_prefix = "static/".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }
}
