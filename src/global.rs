use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::errors::ConfigError;
use crate::session::SessionConfig;

/// Root directory for wallet records and other runtime state
pub const DATA_DIR: &str = "data";

pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Startup timestamp used for uptime reporting
pub static STARTUP_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Check if --debug-<module> was passed on the command line
pub fn is_debug_enabled_for(module: &str) -> bool {
    if let Ok(args) = CMD_ARGS.lock() {
        let flag = format!("--debug-{}", module);
        args.iter().any(|a| a == &flag || a == "--debug-all")
    } else {
        false
    }
}

/// Runtime configuration loaded from configs.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configs {
    pub main_wallet_private: String,
    pub rpc_url: String,
    pub rpc_url_premium: String,
    pub router_api_url: String,
    #[serde(default)]
    pub jito_tip_account: Option<String>,
    pub session: SessionConfig,
}

/// Reads configs.json from the given path and returns a Configs object
pub fn read_configs<P: AsRef<Path>>(path: P) -> Result<Configs, ConfigError> {
    let data = fs::read_to_string(&path).map_err(|e| ConfigError::FileNotFound {
        path: path.as_ref().display().to_string(),
        reason: e.to_string(),
    })?;
    let configs: Configs = serde_json::from_str(&data).map_err(|e| ConfigError::InvalidConfig {
        field: "configs.json".to_string(),
        reason: e.to_string(),
    })?;
    Ok(configs)
}

/// Load the treasury (main wallet) keypair from the configs
///
/// Accepts either a base58 string or a JSON-style byte array like
/// `[12,34,...]` with exactly 64 entries.
pub fn load_wallet_from_config(configs: &Configs) -> Result<Keypair, ConfigError> {
    let raw = configs.main_wallet_private.trim();

    let bytes: Vec<u8> = if raw.starts_with('[') && raw.ends_with(']') {
        raw.trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|s| s.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| ConfigError::InvalidPrivateKey {
                reason: format!("failed to parse key array: {}", e),
            })?
    } else {
        bs58::decode(raw)
            .into_vec()
            .map_err(|e| ConfigError::InvalidPrivateKey {
                reason: format!("invalid base58: {}", e),
            })?
    };

    if bytes.len() != 64 {
        return Err(ConfigError::InvalidPrivateKey {
            reason: format!("expected 64 bytes, got {}", bytes.len()),
        });
    }

    Keypair::try_from(&bytes[..]).map_err(|e| ConfigError::InvalidPrivateKey {
        reason: format!("failed to create keypair: {}", e),
    })
}
