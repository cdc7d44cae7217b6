//! Configuration management with validation and defaults
//!
//! Settings for the game contract, the oracle client and the preview feed.
//! Values come from defaults or a named preset, then an optional TOML file,
//! then `COINFLIP_*` environment variables.

use crate::errors::{CoinflipResult, ConfigurationError};
use crate::games::types::Amount;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Arbitrum Goerli, the chain the public Randomizer sequencer serves
pub const ARBITRUM_GOERLI_CHAIN_ID: u64 = 421_613;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinflipConfig {
    pub oracle: OracleConfig,
    pub game: GameConfig,
    pub preview: PreviewConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// Randomness oracle request settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Gas the oracle reserves for the settlement callback
    pub callback_gas_limit: u64,
    /// Gas price used by the in-process randomizer to quote fees
    pub gas_price_wei: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            callback_gas_limit: 50_000,
            gas_price_wei: 100_000_000, // 0.1 gwei
        }
    }
}

impl OracleConfig {
    pub fn minimum_fee(&self) -> Amount {
        self.callback_gas_limit as Amount * self.gas_price_wei as Amount
    }
}

/// Wager rules
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub min_wager_wei: u64,
    /// Win payout as a multiple of the wager in basis points (20_000 = 2x)
    pub payout_multiplier_bps: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_wager_wei: 1_000_000_000_000_000, // 0.001 ether
            payout_multiplier_bps: 20_000,
        }
    }
}

/// One sequencer endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEndpoint {
    pub chain_id: u64,
    pub url: String,
}

/// Reconnect policy for the preview connection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before outstanding watches fail; 0 disables reconnecting
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            max_attempts: 8,
        }
    }
}

/// Preview feed settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub endpoints: Vec<PreviewEndpoint>,
    pub reconnect: ReconnectConfig,
    /// Deadline applied by callers that want one; watches never time out on their own
    pub default_timeout_ms: Option<u64>,
    pub connect_timeout_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![PreviewEndpoint {
                chain_id: ARBITRUM_GOERLI_CHAIN_ID,
                url: "wss://arb-goerli.vrf.sh".to_string(),
            }],
            reconnect: ReconnectConfig::default(),
            default_timeout_ms: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl PreviewConfig {
    /// Endpoint URL for `chain_id`
    pub fn endpoint_for(&self, chain_id: u64) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|e| e.chain_id == chain_id)
            .map(|e| e.url.as_str())
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Ledger snapshot settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub ledger_path: Option<String>,
}

/// Logging settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "coinflip=info".to_string(),
        }
    }
}

impl CoinflipConfig {
    /// Local development: cheap fees, verbose logs, a sequencer on localhost
    pub fn local_devnet() -> Self {
        Self {
            oracle: OracleConfig {
                callback_gas_limit: 50_000,
                gas_price_wei: 1,
            },
            game: GameConfig {
                min_wager_wei: 1,
                ..Default::default()
            },
            preview: PreviewConfig {
                endpoints: vec![PreviewEndpoint {
                    chain_id: 1337,
                    url: "ws://127.0.0.1:9545".to_string(),
                }],
                reconnect: ReconnectConfig {
                    initial_backoff_ms: 50,
                    max_backoff_ms: 1_000,
                    max_attempts: 3,
                },
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "coinflip=debug".to_string(),
            },
            ..Default::default()
        }
    }

    /// Public Randomizer deployment on Arbitrum Goerli
    pub fn arbitrum_goerli() -> Self {
        Self::default()
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.oracle.callback_gas_limit == 0 {
            return Err(invalid("oracle.callback_gas_limit", "0", "Callback gas limit must be > 0"));
        }

        if self.game.payout_multiplier_bps == 0 {
            return Err(invalid("game.payout_multiplier_bps", "0", "Payout multiplier must be > 0"));
        }

        let reconnect = &self.preview.reconnect;
        if reconnect.initial_backoff_ms == 0 {
            return Err(invalid("preview.reconnect.initial_backoff_ms", "0", "Backoff must be > 0"));
        }
        if reconnect.max_backoff_ms < reconnect.initial_backoff_ms {
            return Err(ConfigurationError::ValidationFailed(
                "preview.reconnect.max_backoff_ms is below initial_backoff_ms".to_string(),
            ));
        }

        for (i, endpoint) in self.preview.endpoints.iter().enumerate() {
            let parsed = url::Url::parse(&endpoint.url).map_err(|e| ConfigurationError::InvalidValue {
                field: format!("preview.endpoints[{}].url", i),
                value: endpoint.url.clone(),
                reason: e.to_string(),
            })?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(invalid(
                    &format!("preview.endpoints[{}].url", i),
                    &endpoint.url,
                    "Scheme must be ws or wss",
                ));
            }
            if self.preview.endpoints[..i]
                .iter()
                .any(|other| other.chain_id == endpoint.chain_id)
            {
                return Err(ConfigurationError::ValidationFailed(format!(
                    "Duplicate preview endpoint for chain {}",
                    endpoint.chain_id
                )));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<CoinflipConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Start from a preset instead of the defaults (ignored when a file is given)
    pub fn with_base(mut self, base: CoinflipConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> CoinflipResult<CoinflipConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => self.base.clone().unwrap_or_default(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> CoinflipResult<CoinflipConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        Ok(toml::from_str(&content)?)
    }

    fn apply_env_overrides(config: &mut CoinflipConfig) -> CoinflipResult<()> {
        if let Some(v) = env_parse::<u64>("COINFLIP_CALLBACK_GAS_LIMIT")? {
            config.oracle.callback_gas_limit = v;
        }
        if let Some(v) = env_parse::<u64>("COINFLIP_GAS_PRICE_WEI")? {
            config.oracle.gas_price_wei = v;
        }
        if let Some(v) = env_parse::<u64>("COINFLIP_MIN_WAGER_WEI")? {
            config.game.min_wager_wei = v;
        }
        if let Some(v) = env_parse::<u64>("COINFLIP_PREVIEW_TIMEOUT_MS")? {
            config.preview.default_timeout_ms = Some(v);
        }
        if let Ok(path) = env::var("COINFLIP_LEDGER_PATH") {
            config.storage.ledger_path = Some(path);
        }
        if let Ok(filter) = env::var("COINFLIP_LOG") {
            config.monitoring.log_filter = filter;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(config: &CoinflipConfig, path: &str) -> CoinflipResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigurationError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| invalid(name, &value, "Not a valid number")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoinflipConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.preview.endpoint_for(ARBITRUM_GOERLI_CHAIN_ID),
            Some("wss://arb-goerli.vrf.sh")
        );
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CoinflipConfig::local_devnet().validate().is_ok());
        assert!(CoinflipConfig::arbitrum_goerli().validate().is_ok());
    }

    #[test]
    fn test_unknown_chain_has_no_endpoint() {
        assert!(CoinflipConfig::default().preview.endpoint_for(1).is_none());
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let mut config = CoinflipConfig::default();
        config.preview.endpoints[0].url = "https://arb-goerli.vrf.sh".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_chain() {
        let mut config = CoinflipConfig::default();
        let dup = config.preview.endpoints[0].clone();
        config.preview.endpoints.push(dup);
        assert!(matches!(config.validate(), Err(ConfigurationError::ValidationFailed(_))));
    }

    #[test]
    fn test_backoff_ordering_validation() {
        let mut config = CoinflipConfig::default();
        config.preview.reconnect.max_backoff_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimum_fee() {
        let oracle = OracleConfig {
            callback_gas_limit: 50_000,
            gas_price_wei: 2,
        };
        assert_eq!(oracle.minimum_fee(), 100_000);
    }

    #[test]
    fn test_save_and_load_config() -> CoinflipResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let original = CoinflipConfig::local_devnet();
        ConfigLoader::save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;

        assert_eq!(loaded.preview.endpoints, original.preview.endpoints);
        assert_eq!(loaded.game.min_wager_wei, original.game.min_wager_wei);
        Ok(())
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CoinflipConfig = toml::from_str("[game]\nmin_wager_wei = 5\n").unwrap();
        assert_eq!(config.game.min_wager_wei, 5);
        assert_eq!(config.game.payout_multiplier_bps, 20_000);
        assert_eq!(config.oracle.callback_gas_limit, 50_000);
    }
}
