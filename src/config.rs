use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CachesConfig,
  #[serde(default)]
  pub sync: SyncSettings,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub search: SearchConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api".to_string(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  10
}

/// Cache policy for one store as written in the config file.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheSettings {
  pub ttl_secs: u64,
  pub max_size: usize,
}

impl CacheSettings {
  const fn new(ttl_secs: u64, max_size: usize) -> Self {
    Self { ttl_secs, max_size }
  }
}

impl From<CacheSettings> for CacheConfig {
  fn from(settings: CacheSettings) -> Self {
    CacheConfig {
      ttl: Duration::from_secs(settings.ttl_secs),
      max_size: settings.max_size,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
  pub projects: CacheSettings,
  pub todos: CacheSettings,
  pub reports: CacheSettings,
  pub users: CacheSettings,
}

impl Default for CachesConfig {
  fn default() -> Self {
    Self {
      projects: CacheSettings::new(300, 100),
      todos: CacheSettings::new(300, 100),
      reports: CacheSettings::new(300, 100),
      users: CacheSettings::new(600, 50),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  pub max_events: usize,
  pub event_max_age_hours: i64,
  pub sweep_interval_mins: u64,
  pub sync_delay_ms: u64,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      max_events: 100,
      event_max_age_hours: 24,
      sweep_interval_mins: 60,
      sync_delay_ms: 100,
    }
  }
}

impl From<&SyncSettings> for SyncConfig {
  fn from(settings: &SyncSettings) -> Self {
    SyncConfig {
      max_events: settings.max_events,
      event_max_age: chrono::Duration::hours(settings.event_max_age_hours),
      sweep_interval: Duration::from_secs(settings.sweep_interval_mins.saturating_mul(60)),
      sync_delay: Duration::from_millis(settings.sync_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  /// Failed logins before the lockout starts
  pub max_attempts: u32,
  pub lockout_mins: u64,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      lockout_mins: 15,
    }
  }
}

impl AuthConfig {
  pub fn lockout(&self) -> Duration {
    Duration::from_secs(self.lockout_mins.saturating_mul(60))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub debounce_ms: u64,
  /// Shorter keywords return no results without a request
  pub min_chars: usize,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 300,
      min_chars: 2,
    }
  }
}

impl SearchConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter when RUST_LOG is not set
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./pmdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pmdeck/config.yaml
  ///
  /// Without any file the defaults are used. `PMDECK_API_URL` overrides
  /// the API base URL.
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
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("PMDECK_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pmdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pmdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Reject values the runtime cannot work with.
  fn validate(&self) -> Result<()> {
    const WEEK_MINS: u64 = 7 * 24 * 60;

    if !(1..=WEEK_MINS).contains(&self.sync.sweep_interval_mins) {
      return Err(eyre!(
        "sync.sweep_interval_mins must be between 1 and {}",
        WEEK_MINS
      ));
    }
    if !(1..=24 * 365).contains(&self.sync.event_max_age_hours) {
      return Err(eyre!("sync.event_max_age_hours must be between 1 and 8760"));
    }
    if self.sync.max_events == 0 {
      return Err(eyre!("sync.max_events must be at least 1"));
    }
    if self.auth.max_attempts == 0 {
      return Err(eyre!("auth.max_attempts must be at least 1"));
    }
    if self.auth.lockout_mins > WEEK_MINS {
      return Err(eyre!("auth.lockout_mins must be at most {}", WEEK_MINS));
    }
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be at least 1"));
    }
    Ok(())
  }

  /// Get the login password from the environment.
  ///
  /// Checks PMDECK_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("PMDECK_PASSWORD")
      .map_err(|_| eyre!("Password not given. Pass --password or set PMDECK_PASSWORD."))
  }

  /// Directory for the session database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pmdeck"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.auth.max_attempts, 5);
    assert_eq!(config.auth.lockout(), Duration::from_secs(15 * 60));
    assert_eq!(config.search.debounce(), Duration::from_millis(300));
    assert_eq!(config.cache.users.max_size, 50);
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let yaml = r#"
api:
  base_url: "https://pm.example.com/api"
cache:
  todos: { ttl_secs: 30, max_size: 10 }
sync:
  max_events: 20
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.api.base_url, "https://pm.example.com/api");
    assert_eq!(config.api.timeout_secs, 10);

    let todos: CacheConfig = config.cache.todos.into();
    assert_eq!(todos.ttl, Duration::from_secs(30));
    assert_eq!(todos.max_size, 10);
    assert_eq!(config.cache.projects.ttl_secs, 300);

    let sync = SyncConfig::from(&config.sync);
    assert_eq!(sync.max_events, 20);
    assert_eq!(sync.event_max_age, chrono::Duration::hours(24));
  }

  #[test]
  fn test_out_of_range_values_are_rejected() {
    for yaml in [
      "sync:\n  sweep_interval_mins: 0\n",
      "sync:\n  sweep_interval_mins: 18446744073709551615\n",
      "sync:\n  event_max_age_hours: -1\n",
      "auth:\n  max_attempts: 0\n",
      "auth:\n  lockout_mins: 18446744073709551615\n",
    ] {
      assert!(Config::parse(yaml).is_err(), "accepted {:?}", yaml);
    }

    let config = Config::parse("sync:\n  sweep_interval_mins: 1\n").unwrap();
    assert_eq!(
      SyncConfig::from(&config.sync).sweep_interval,
      Duration::from_secs(60)
    );
  }

  #[test]
  fn test_mistyped_cache_setting_is_rejected() {
    let yaml = "cache:\n  todos: { ttl_secs: \"soon\", max_size: 10 }\n";
    assert!(Config::parse(yaml).is_err());
  }
}
