//! Runtime configuration.
//!
//! [`SettlementConfig`] gathers every secret and endpoint the settlement components
//! need. Values come from the environment ([`SettlementConfig::from_env`]) or from the
//! builder methods; components call [`SettlementConfig::require`] when they are
//! constructed so a missing secret stops the process at startup.

use crate::errors::{Result, SettlementError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Operator secret used to derive the deposit-key encryption key.
pub const WALLET_ENCRYPTION_KEY_ENV: &str = "PAYMENT_WALLET_ENCRYPTION_KEY";
/// Base URL of the attestation authority.
pub const IRIS_BASE_URL_ENV: &str = "CIRCLE_IRIS_BASE_URL";
/// Endpoint of the destination-chain forwarding relayer.
pub const FORWARDER_URL_ENV: &str = "CCTP_SOLANA_FORWARDER_URL";
/// Base URL of the pool service.
pub const POOL_API_BASE_URL_ENV: &str = "SHADOWWIRE_API_BASE_URL";
/// API key of the pool service.
pub const POOL_API_KEY_ENV: &str = "SHADOWWIRE_API_KEY";
/// Pool operating keypair (64-byte JSON array).
pub const POOL_SECRET_KEY_ENV: &str = "SHADOWWIRE_POOL_SECRET_KEY";
/// Destination chain JSON-RPC endpoint.
pub const SOLANA_RPC_URL_ENV: &str = "SOLANA_RPC_URL";
/// Prefix of per-chain RPC overrides, e.g. `EVM_RPC_42161`.
pub const EVM_RPC_PREFIX: &str = "EVM_RPC_";

const DEFAULT_IRIS_BASE_URL: &str = "https://iris-api.circle.com";
const DEFAULT_POOL_API_BASE_URL: &str = "https://shadow.radr.fun/shadowpay/api";
const DEFAULT_MIN_FINALITY_THRESHOLD: u32 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_STORE_DIR: &str = ".data";

/// Configuration shared by the settlement components.
#[derive(Clone)]
pub struct SettlementConfig {
    /// Operator secret for deposit-key encryption
    pub wallet_encryption_key: Option<String>,

    /// Attestation authority base URL
    pub iris_base_url: String,

    /// Forwarding relayer endpoint
    pub forwarder_url: Option<String>,

    /// Pool service base URL
    pub pool_api_base_url: String,

    /// Pool service API key
    pub pool_api_key: Option<String>,

    /// Pool operating keypair
    pub pool_secret_key: Option<String>,

    /// Destination chain RPC endpoint
    pub solana_rpc_url: Option<String>,

    /// `maxFee` passed to `depositForBurn`, in USDC units
    pub max_fee: u64,

    /// `minFinalityThreshold` passed to `depositForBurn`
    pub min_finality_threshold: u32,

    /// Delay between attestation polls
    pub attestation_poll_interval: Duration,

    /// Attestation polls before giving up
    pub attestation_max_attempts: u32,

    /// Directory holding `payments.json`
    pub store_dir: PathBuf,

    /// Extra EVM chains, as JSON
    pub custom_chains_json: Option<String>,

    /// Per chain id RPC overrides
    pub rpc_overrides: HashMap<u64, String>,
}

impl SettlementConfig {
    /// Creates a configuration with defaults and no secrets.
    ///
    /// # Examples
    ///
    /// ```
    /// use cctp_settlement::config::SettlementConfig;
    ///
    /// let config = SettlementConfig::new()
    ///     .with_wallet_encryption_key("operator secret")
    ///     .with_forwarder_url("https://forwarder.example.com/forward");
    /// assert_eq!(config.attestation_max_attempts, 60);
    /// ```
    pub fn new() -> Self {
        Self {
            wallet_encryption_key: None,
            iris_base_url: DEFAULT_IRIS_BASE_URL.to_string(),
            forwarder_url: None,
            pool_api_base_url: DEFAULT_POOL_API_BASE_URL.to_string(),
            pool_api_key: None,
            pool_secret_key: None,
            solana_rpc_url: None,
            max_fee: 0,
            min_finality_threshold: DEFAULT_MIN_FINALITY_THRESHOLD,
            attestation_poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            attestation_max_attempts: DEFAULT_MAX_ATTEMPTS,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            custom_chains_json: None,
            rpc_overrides: HashMap::new(),
        }
    }

    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Loads the configuration from `(name, value)` pairs. Empty values count as unset.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k, v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |name: &str| vars.get(name).cloned();

        let mut config = Self::new();
        config.wallet_encryption_key = get(WALLET_ENCRYPTION_KEY_ENV);
        if let Some(url) = get(IRIS_BASE_URL_ENV) {
            config.iris_base_url = url;
        }
        config.forwarder_url = get(FORWARDER_URL_ENV);
        if let Some(url) = get(POOL_API_BASE_URL_ENV) {
            config.pool_api_base_url = url;
        }
        config.pool_api_key = get(POOL_API_KEY_ENV).or_else(|| get("NEXT_PUBLIC_SHADOWWIRE_API_KEY"));
        config.pool_secret_key = get(POOL_SECRET_KEY_ENV);
        config.solana_rpc_url = get(SOLANA_RPC_URL_ENV).or_else(|| get("NEXT_PUBLIC_SOLANA_RPC_URL"));
        if let Some(fee) = get("CCTP_MAX_FEE") {
            config.max_fee = parse_number("CCTP_MAX_FEE", &fee)?;
        }
        if let Some(threshold) = get("CCTP_MIN_FINALITY_THRESHOLD") {
            config.min_finality_threshold = parse_number("CCTP_MIN_FINALITY_THRESHOLD", &threshold)?;
        }
        if let Some(ms) = get("ATTESTATION_POLL_INTERVAL_MS") {
            config.attestation_poll_interval =
                Duration::from_millis(parse_number("ATTESTATION_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(attempts) = get("ATTESTATION_MAX_ATTEMPTS") {
            config.attestation_max_attempts = parse_number("ATTESTATION_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(dir) = get("PAYMENT_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        config.custom_chains_json =
            get("CCTP_EVM_CHAINS_JSON").or_else(|| get("NEXT_PUBLIC_CCTP_EVM_CHAINS_JSON"));

        for (name, value) in &vars {
            if let Some(chain_id) = name.strip_prefix(EVM_RPC_PREFIX) {
                let chain_id: u64 = parse_number(name, chain_id)?;
                config.rpc_overrides.insert(chain_id, value.clone());
            }
        }

        Ok(config)
    }

    /// Sets the deposit-key encryption secret.
    pub fn with_wallet_encryption_key(mut self, secret: impl Into<String>) -> Self {
        self.wallet_encryption_key = Some(secret.into());
        self
    }

    /// Sets the attestation authority base URL.
    pub fn with_iris_base_url(mut self, url: impl Into<String>) -> Self {
        self.iris_base_url = url.into();
        self
    }

    /// Sets the forwarding relayer endpoint.
    pub fn with_forwarder_url(mut self, url: impl Into<String>) -> Self {
        self.forwarder_url = Some(url.into());
        self
    }

    /// Sets the pool service endpoint, key and operating keypair.
    pub fn with_pool(
        mut self,
        api_base_url: impl Into<String>,
        api_key: Option<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.pool_api_base_url = api_base_url.into();
        self.pool_api_key = api_key;
        self.pool_secret_key = Some(secret_key.into());
        self
    }

    /// Sets the destination chain RPC endpoint.
    pub fn with_solana_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.solana_rpc_url = Some(url.into());
        self
    }

    /// Sets the attestation polling budget.
    pub fn with_attestation_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.attestation_poll_interval = interval;
        self.attestation_max_attempts = max_attempts;
        self
    }

    /// Sets the directory of the payment store.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// Overrides the RPC endpoint of one EVM chain.
    pub fn with_rpc_override(mut self, chain_id: u64, url: impl Into<String>) -> Self {
        self.rpc_overrides.insert(chain_id, url.into());
        self
    }

    /// Returns a configured value or a [`SettlementError::ConfigError`] naming its variable.
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SettlementError::ConfigError(format!("{} is not configured.", name)))
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SettlementConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementConfig")
            .field("wallet_encryption_key", &self.wallet_encryption_key.as_ref().map(|_| "<redacted>"))
            .field("iris_base_url", &self.iris_base_url)
            .field("forwarder_url", &self.forwarder_url)
            .field("pool_api_base_url", &self.pool_api_base_url)
            .field("pool_secret_key", &self.pool_secret_key.as_ref().map(|_| "<redacted>"))
            .field("solana_rpc_url", &self.solana_rpc_url)
            .field("store_dir", &self.store_dir)
            .finish_non_exhaustive()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SettlementError::ConfigError(format!("{} is not a valid number: {}", name, value)))
}
