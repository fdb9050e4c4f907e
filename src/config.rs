// =============================================================================
// SATKAS - Configuration
// =============================================================================
//
// Defaults, overridden by environment variables, overridden by CLI flags.
//
// =============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::atomic_swaps::engine::RetryPolicy;
use crate::atomic_swaps::htlc_script::ContractVariant;
use crate::storage::DEFAULT_DB_PATH;
use crate::wallet::SCHEME_SCHNORR;
use crate::DEFAULT_FEE;

pub const DEFAULT_NETWORK_PREFIX: &str = "kaspa";
pub const DEFAULT_REST_URL: &str = "https://api.kaspa.org";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;

/// kaspawallet settings used to fund contracts
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// kaspawallet binary; funding is manual without it
    pub path: Option<String>,
    pub daemon: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<String>,
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("path", &self.path)
            .field("daemon", &self.daemon)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapConfig {
    pub network_prefix: String,
    pub rest_url: String,
    /// None decodes invoices with the built-in reader and cannot pay
    pub lncli_path: Option<String>,
    pub ln_rpc_server: Option<String>,
    pub db_path: String,
    /// Sompi
    pub fee: u64,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    /// None retries sequence-lock rejections forever
    pub max_broadcast_retries: Option<u32>,
    pub contract_variant: ContractVariant,
    pub signature_scheme: String,
    pub wallet: WalletConfig,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            network_prefix: DEFAULT_NETWORK_PREFIX.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            lncli_path: None,
            ln_rpc_server: None,
            db_path: DEFAULT_DB_PATH.to_string(),
            fee: DEFAULT_FEE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_broadcast_retries: None,
            contract_variant: ContractVariant::Full,
            signature_scheme: SCHEME_SCHNORR.to_string(),
            wallet: WalletConfig::default(),
        }
    }
}

impl SwapConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = SwapConfig::default();

        if let Some(v) = get("KAS_NETWORK_PREFIX") {
            config.network_prefix = v.to_lowercase();
        }
        if let Some(v) = get("KAS_REST_URL") {
            config.rest_url = v;
        }
        config.lncli_path = get("LNCLI");
        config.ln_rpc_server = get("LN_RPC_SERVER");
        if let Some(v) = get("SATKAS_DB") {
            config.db_path = v;
        }
        if let Some(v) = get("KAS_FEE") {
            config.fee = parse_number("KAS_FEE", &v)?;
        }
        if let Some(v) = get("SATKAS_POLL_MS") {
            config.poll_interval_ms = parse_number("SATKAS_POLL_MS", &v)?;
        }
        if let Some(v) = get("SATKAS_RETRY_MS") {
            config.retry_delay_ms = parse_number("SATKAS_RETRY_MS", &v)?;
        }
        if let Some(v) = get("SATKAS_MAX_RETRIES") {
            config.max_broadcast_retries = parse_max_retries(&v)?;
        }
        if let Some(v) = get("SATKAS_SIGNATURE_SCHEME") {
            config.signature_scheme = v;
        }

        config.wallet = WalletConfig {
            path: get("KASPAWALLET"),
            daemon: get("KASPAWALLET_DAEMON"),
            password: get("KASPAWALLET_PASSWORD"),
            key_file: get("KASPAWALLET_KEY_FILE"),
        };

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.retry_delay_ms),
            max_retries: self.max_broadcast_retries,
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, String> {
    value.parse().map_err(|e| format!("Invalid {}={}: {}", key, value, e))
}

/// "none" or "unbounded" keep retrying forever
pub fn parse_max_retries(value: &str) -> Result<Option<u32>, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "unbounded" => Ok(None),
        n => n
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid max retries {}: {}", value, e)),
    }
}

// =============================================================================
// Tests
// =============================================================================
