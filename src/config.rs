//! Configuration management for SimChain

use crate::error::ChainError;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SimConfig {
    /// Balance seeded into an identity's account the first time it is resolved.
    /// Amounts beyond the TOML integer range are written as strings.
    #[serde(default = "default_balance", deserialize_with = "deserialize_amount")]
    pub default_balance: u128,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Leading zero bits required of a block hash.
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_mining_rounds")]
    pub mining_rounds: u64,
    #[serde(default = "default_block_reward", deserialize_with = "deserialize_amount")]
    pub block_reward: u128,
    /// Number of `account<N>` identities funded in the genesis state.
    #[serde(default = "default_genesis_accounts")]
    pub genesis_accounts: u32,
    #[serde(default = "default_source_cache_size")]
    pub source_cache_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            default_balance: default_balance(),
            gas_limit: default_gas_limit(),
            difficulty: default_difficulty(),
            mining_rounds: default_mining_rounds(),
            block_reward: default_block_reward(),
            genesis_accounts: default_genesis_accounts(),
            source_cache_size: default_source_cache_size(),
            log_level: default_log_level(),
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(config_str: &str) -> Result<Self, ChainError> {
        let config: SimConfig = if config_str.trim().is_empty() {
            SimConfig::default()
        } else {
            toml::from_str(config_str)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.gas_limit == 0 {
            return Err(ChainError::ConfigError("gas_limit must be positive".into()));
        }
        if self.mining_rounds == 0 {
            return Err(ChainError::ConfigError("mining_rounds must be positive".into()));
        }
        if self.difficulty > 255 {
            return Err(ChainError::ConfigError(format!(
                "difficulty {} exceeds 255 bits",
                self.difficulty
            )));
        }
        if self.genesis_accounts == 0 {
            return Err(ChainError::ConfigError(
                "genesis_accounts must be at least 1 (account0 deploys contracts)".into(),
            ));
        }
        if self.source_cache_size == 0 {
            return Err(ChainError::ConfigError("source_cache_size must be positive".into()));
        }
        self.tracing_level()?;
        Ok(())
    }

    pub fn tracing_level(&self) -> Result<tracing::Level, ChainError> {
        self.log_level
            .parse()
            .map_err(|_| ChainError::ConfigError(format!("unknown log_level {:?}", self.log_level)))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Amount {
    Integer(u64),
    Text(String),
}

/// Reads a `u128` amount from a TOML integer or a decimal string, which may
/// use `_` separators.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    match Amount::deserialize(deserializer)? {
        Amount::Integer(value) => Ok(u128::from(value)),
        Amount::Text(text) => text
            .replace('_', "")
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid amount {:?}", text))),
    }
}

/// Loads the configuration at `path`; a missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<SimConfig, ChainError> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    SimConfig::from_toml_str(&config_str)
}

fn default_balance() -> u128 {
    10u128.pow(24)
}

fn default_gas_limit() -> u64 {
    1_000_000_000
}

fn default_difficulty() -> u32 {
    1
}

fn default_mining_rounds() -> u64 {
    100
}

fn default_block_reward() -> u128 {
    5 * 10u128.pow(18)
}

fn default_genesis_accounts() -> u32 {
    10
}

fn default_source_cache_size() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}
