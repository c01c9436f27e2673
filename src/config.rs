use crate::chain::rpc::ws_url_from_rpc;
use crate::decoder::LayoutVersion;
use crate::domain::Address;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub solana_rpc_url: String,
    pub solana_ws_url: String,
    pub market_program: Address,
    pub registry_program: Address,
    /// `None` disables the periodic sync.
    pub asset_sync_interval: Option<Duration>,
    pub event_retry_max_elapsed: Duration,
    pub account_layout: LayoutVersion,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("3001")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = required(&env_map, "DATABASE_PATH")?;

        let solana_rpc_url = env_map
            .get("SOLANA_RPC_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let solana_ws_url = env_map
            .get("SOLANA_WS_URL")
            .cloned()
            .unwrap_or_else(|| ws_url_from_rpc(&solana_rpc_url));

        let market_program = program_id(&env_map, "RWA_MARKET_PROGRAM_ID")?;
        let registry_program = program_id(&env_map, "RWA_REGISTRY_PROGRAM_ID")?;

        let sync_secs = seconds(&env_map, "ASSET_SYNC_INTERVAL_SECS", 300)?;
        let asset_sync_interval = (sync_secs > 0).then(|| Duration::from_secs(sync_secs));

        let event_retry_max_elapsed =
            Duration::from_secs(seconds(&env_map, "EVENT_RETRY_MAX_ELAPSED_SECS", 30)?);

        let account_layout = env_map
            .get("ACCOUNT_LAYOUT_VERSION")
            .map(|s| s.as_str())
            .unwrap_or("v1")
            .parse::<LayoutVersion>()
            .map_err(|e| ConfigError::InvalidValue("ACCOUNT_LAYOUT_VERSION".to_string(), e))?;

        Ok(Config {
            port,
            database_path,
            solana_rpc_url,
            solana_ws_url,
            market_program,
            registry_program,
            asset_sync_interval,
            event_retry_max_elapsed,
            account_layout,
        })
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn program_id(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    let raw = required(env_map, key)?;
    Address::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn seconds(env_map: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a whole number of seconds".to_string())
        }),
    }
}
