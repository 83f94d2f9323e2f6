//! Application configuration with layered loading.
//!
//! Configuration is assembled with figment from three sources:
//!
//! 1. Environment variables (PERMACACHE_*)
//! 2. TOML config file (if PERMACACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PERMACACHE_*)
/// 2. TOML config file (if PERMACACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory of the permanent cache. Blobs live directly under it,
    /// the metadata database next to them.
    ///
    /// Set via PERMACACHE_CACHE_ROOT environment variable.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via PERMACACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per resource.
    ///
    /// Set via PERMACACHE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via PERMACACHE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Capacity of the transient in-memory response cache, in entries.
    ///
    /// Set via PERMACACHE_TRANSIENT_CAPACITY environment variable.
    #[serde(default = "default_transient_capacity")]
    pub transient_capacity: usize,
}

fn default_cache_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("permacache")
}

fn default_user_agent() -> String {
    "permacache/0.1".into()
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB, image variants included
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_transient_capacity() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            transient_capacity: default_transient_capacity(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Path of the metadata database, adjacent to the blob files.
    pub fn db_path(&self) -> PathBuf {
        self.cache_root.join("permacache.sqlite")
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PERMACACHE_`
    /// 2. TOML file from `PERMACACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PERMACACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PERMACACHE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.user_agent, "permacache/0.1");
        assert_eq!(config.max_bytes, 10_485_760);
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.transient_capacity, 64);
        assert!(config.cache_root.ends_with("permacache"));
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_db_path_under_root() {
        let config = AppConfig { cache_root: PathBuf::from("/tmp/pc"), ..Default::default() };
        assert_eq!(config.db_path(), PathBuf::from("/tmp/pc/permacache.sqlite"));
    }
}
