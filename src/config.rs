use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(1500)
}

/// Retry settings for bulk exchange fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per symbol before it is skipped.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            backoff: default_retry_backoff(),
        }
    }
}

/// Settings for the per-source 429 gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// How long a source stays gated after a 429.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub cooldown: Duration,

    /// Rate-limited attempts allowed per quote lookup before giving up.
    pub max_attempts: u32,

    /// How often a waiting caller re-checks the gate.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            max_attempts: 10,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Known price source implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceType {
    /// Coinbase Exchange public market data
    CoinbaseExchange,
    /// Binance public market data
    Binance,
}

/// One entry of the price source registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSourceConfig {
    /// Name used in logs and fallback bookkeeping.
    pub name: String,

    #[serde(rename = "type")]
    pub source_type: PriceSourceType,

    /// Override the API base URL (tests, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fallback ordering (lower = tried first).
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

impl PriceSourceConfig {
    pub fn new(name: impl Into<String>, source_type: PriceSourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            base_url: None,
            enabled: true,
            priority: default_priority(),
        }
    }
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

/// Ethereum address ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    pub address: String,

    pub api_key: String,

    /// Override the Etherscan API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Native coin used for value legs and gas fees.
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
}

/// Config file location: `chainbook.toml` in the working directory if it
/// exists, else under the user config directory.
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("chainbook.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("chainbook").join("chainbook.toml");
    }

    local_config
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,

    pub rate_limit: RateLimitConfig,

    /// Price source registry. Empty means the built-in default order.
    pub price_sources: Vec<PriceSourceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethereum: Option<EthereumConfig>,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Enabled price sources sorted by priority, falling back to the
    /// built-in registry when none are configured.
    pub fn price_source_registry(&self) -> Vec<PriceSourceConfig> {
        if self.price_sources.is_empty() {
            return vec![
                PriceSourceConfig::new("coinbase", PriceSourceType::CoinbaseExchange),
                PriceSourceConfig::new("binance", PriceSourceType::Binance),
            ];
        }

        let mut sources: Vec<PriceSourceConfig> = self
            .price_sources
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        // Stable: equal priorities keep declaration order.
        sources.sort_by_key(|s| s.priority);
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Duration::from_millis(1500));
        assert_eq!(config.rate_limit.cooldown, Duration::from_secs(5));
        assert_eq!(config.rate_limit.max_attempts, 10);
        assert!(config.ethereum.is_none());
    }

    #[test]
    fn test_load_config() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
[retry]
max_attempts = 5
backoff = "250ms"

[rate_limit]
cooldown = "2s"

[[price_sources]]
name = "binance"
type = "binance"
priority = 20

[[price_sources]]
name = "coinbase"
type = "coinbase_exchange"
priority = 10

[[price_sources]]
name = "disabled"
type = "binance"
enabled = false

[ethereum]
address = "0xabc"
api_key = "key"
"#
        )?;

        let config = Config::load(file.path())?;
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, Duration::from_millis(250));
        assert_eq!(config.rate_limit.cooldown, Duration::from_secs(2));
        assert_eq!(config.rate_limit.max_attempts, 10);

        let registry = config.price_source_registry();
        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["coinbase", "binance"]);

        let eth = config.ethereum.expect("ethereum section");
        assert_eq!(eth.native_symbol, "ETH");
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_default() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_or_default(&dir.path().join("missing.toml"))?;
        assert_eq!(config.price_source_registry().len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_duration_is_error() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[retry]\nbackoff = \"soon\"")?;
        assert!(Config::load(file.path()).is_err());
        Ok(())
    }
}
