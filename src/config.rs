//! Runtime configuration: defaults, an optional JSON file and `LEDGER_*` variables

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex characters required in a block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,

    /// Amount minted per mined block
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seal blocks on the rayon pool instead of the calling thread
    #[serde(default)]
    pub parallel_mining: bool,
}

fn default_difficulty() -> usize {
    3
}

fn default_mining_reward() -> f64 {
    10.0
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
            host: default_host(),
            port: default_port(),
            parallel_mining: false,
        }
    }
}

impl LedgerConfig {
    /// Loads configuration from `LEDGER_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Reads a JSON config file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Applies `LEDGER_*` variables from the environment on top of `self`
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Applies `LEDGER_*` variables from `lookup` on top of `self`
    pub fn with_overrides<F>(self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self;

        if let Some(value) = parse(&lookup, "LEDGER_DIFFICULTY")? {
            config.difficulty = value;
        }
        if let Some(value) = parse(&lookup, "LEDGER_MINING_REWARD")? {
            config.mining_reward = value;
        }
        if let Some(value) = lookup("LEDGER_HOST") {
            config.host = value;
        }
        if let Some(value) = parse(&lookup, "LEDGER_PORT")? {
            config.port = value;
        }
        if let Some(value) = parse(&lookup, "LEDGER_PARALLEL_MINING")? {
            config.parallel_mining = value;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
