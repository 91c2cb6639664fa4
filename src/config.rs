//! Configuration management for procledger

use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_mining_reward")]
    pub mining_reward: u64,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub beneficiary: String,
    #[serde(default = "default_mine_interval")]
    pub interval_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_reward: default_mining_reward(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            beneficiary: String::new(),
            interval_secs: default_mine_interval(),
        }
    }
}

fn default_difficulty() -> u32 {
    2
}

fn default_mining_reward() -> u64 {
    100
}

fn default_data_path() -> String {
    "./data/ledger.db".to_string()
}

fn default_mine_interval() -> u64 {
    10
}

/// Load configuration from `config.toml` in the working directory, falling
/// back to defaults when the file is absent.
pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    load_config_from("config.toml")
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config {
            chain: ChainConfig::default(),
            database: DatabaseConfig::default(),
            miner: MinerConfig::default(),
        }
    } else {
        toml::from_str(&config_str)?
    };

    // Validate critical values
    if config.database.path.is_empty() {
        return Err("database.path must be set in config.toml".into());
    }

    if config.miner.enabled && config.miner.beneficiary.is_empty() {
        return Err("miner.beneficiary must be set when mining is enabled".into());
    }

    Ok(config)
}
