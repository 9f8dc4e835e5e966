use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::harvest::session::{Credentials, SessionConfig};
use crate::stack::DEFAULT_MAX_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Harvest account id, sent with every request
  pub account_id: String,
  /// Override for the Harvest API base URL
  pub api_url: Option<String>,
  /// Override for the token refresh endpoint
  pub refresh_url: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub stack: StackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before a cached response is refetched; 0 keeps entries until cleared
  #[serde(default = "default_ttl_seconds")]
  pub ttl_seconds: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_seconds: default_ttl_seconds(),
    }
  }
}

fn default_ttl_seconds() -> u64 {
  300
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
  #[serde(default = "default_max_size")]
  pub max_size: usize,
}

impl Default for StackConfig {
  fn default() -> Self {
    Self {
      max_size: default_max_size(),
    }
  }
}

fn default_max_size() -> usize {
  DEFAULT_MAX_SIZE
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./scythe.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/scythe/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/scythe/config.yaml\n\
                 containing at least `account_id: <your Harvest account id>`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("scythe.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("scythe").join("config.yaml");
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
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Cache time-to-live, or `None` when entries should never expire.
  pub fn cache_ttl(&self) -> Option<chrono::Duration> {
    match self.cache.ttl_seconds {
      0 => None,
      secs => Some(chrono::Duration::seconds(secs as i64)),
    }
  }

  pub fn session_config(&self) -> Result<SessionConfig> {
    let mut config = SessionConfig::new(self.account_id.clone())?;
    if let Some(url) = &self.api_url {
      config = config.with_base_url(url)?;
    }
    if let Some(url) = &self.refresh_url {
      config = config.with_refresh_url(url)?;
    }
    Ok(config)
  }

  /// Get the Harvest credentials.
  ///
  /// SCYTHE_ACCESS_TOKEN and SCYTHE_REFRESH_TOKEN take precedence over the
  /// credentials file written by `scythe auth`.
  pub fn load_credentials() -> Result<Credentials> {
    if let (Ok(access_token), Ok(refresh_token)) = (
      std::env::var("SCYTHE_ACCESS_TOKEN"),
      std::env::var("SCYTHE_REFRESH_TOKEN"),
    ) {
      return Ok(Credentials {
        access_token,
        refresh_token,
      });
    }

    let path = Self::credentials_path()?;
    let contents = std::fs::read_to_string(&path).map_err(|_| {
      eyre!("Not authorized with Harvest. Run `scythe auth <access-token> <refresh-token>` first.")
    })?;

    serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse credentials {}: {}", path.display(), e))
  }

  /// Persist credentials for later runs.
  pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    write_credentials(&Self::credentials_path()?, credentials)
  }

  pub fn credentials_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
      .ok_or_else(|| eyre!("Could not determine config directory"))?;

    Ok(config_dir.join("scythe").join("credentials.json"))
  }

  /// Directory for the log file.
  pub fn log_dir() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(std::env::temp_dir)
      .join("scythe")
  }
}

fn write_credentials(path: &Path, credentials: &Credentials) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
  }

  std::fs::write(path, serde_json::to_vec_pretty(credentials)?)
    .map_err(|e| eyre!("Failed to write credentials {}: {}", path.display(), e))?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
  }

  Ok(())
}
