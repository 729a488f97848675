//! Typed configuration, loaded from CLI flags (with env fallback) plus an
//! optional JSON config file, validated eagerly at startup (§6 "Environment
//! knobs", §10.3).

use alloy_primitives::{Address, B256};
use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    JsonParse(PathBuf, serde_json::Error),
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("settlement timeout ms must be between 5000 and 300000, got {0}")]
    SettlementTimeoutOutOfRange(u64),
    #[error("durable store URL is required in production mode")]
    DurableStoreRequiredInProduction,
    #[error("unresolved environment variable reference: {0}")]
    UnresolvedEnvVar(String),
    #[error("no chain configuration for network {0}")]
    UnknownChain(String),
}

#[derive(Parser, Debug)]
#[command(name = "x402-facilitator", about = "x402 payment facilitator")]
pub struct CliArgs {
    /// Path to a JSON config file.
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

/// A scalar value that may be given literally or as `$VAR` / `${VAR}`,
/// resolved against the process environment at deserialize time. This keeps
/// secrets (private keys, RPC URLs with embedded API keys) out of checked-in
/// config files.
#[derive(Debug, Clone)]
pub struct LiteralOrEnv<T>(pub T);

impl<T> std::ops::Deref for LiteralOrEnv<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let resolved = resolve_env_reference(&raw).map_err(serde::de::Error::custom)?;
        let parsed = resolved
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("{e}")))?;
        Ok(LiteralOrEnv(parsed))
    }
}

fn resolve_env_reference(raw: &str) -> Result<String, String> {
    let name = if let Some(stripped) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(stripped)
    } else {
        raw.strip_prefix('$')
    };
    match name {
        Some(var) => std::env::var(var).map_err(|_| format!("unresolved environment variable reference: {var}")),
        None => Ok(raw.to_string()),
    }
}

/// A 32-byte EVM private key, validated as `0x`-prefixed 64-hex-char.
#[derive(Debug, Clone)]
pub struct EvmPrivateKey(pub B256);

impl FromStr for EvmPrivateKey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").ok_or("private key must be 0x-prefixed")?;
        if stripped.len() != 64 {
            return Err("private key must be 32 bytes (64 hex chars)".to_string());
        }
        let bytes = hex::decode(stripped).map_err(|e| e.to_string())?;
        Ok(EvmPrivateKey(B256::from_slice(&bytes)))
    }
}

/// Direct mode admits the facilitator's own address as a valid witness-spend
/// spender (SPEC_FULL.md §9 open question 2); splitter-proxy mode does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Direct,
    SplitterProxy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: LiteralOrEnv<Url>,
    /// Zero address (or omitted) disables the splitter for this chain.
    #[serde(default)]
    pub splitter_address: Option<Address>,
    #[serde(default = "default_operating_mode")]
    pub operating_mode: OperatingMode,
    #[serde(default)]
    pub treasury: Option<Address>,
}

fn default_operating_mode() -> OperatingMode {
    OperatingMode::Direct
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub signer_private_key: LiteralOrEnv<EvmPrivateKey>,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub durable_store_url: Option<String>,
    #[serde(default = "default_settlement_timeout_ms")]
    pub settlement_timeout_ms: u64,
    #[serde(default = "default_max_gas_price_wei")]
    pub max_gas_price_wei: u128,
    #[serde(default)]
    pub min_settlement_unit: u128,
    #[serde(default = "default_production")]
    pub production: bool,
    #[serde(default)]
    pub webhook_hmac_secret: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    4021
}
fn default_settlement_timeout_ms() -> u64 {
    30_000
}
fn default_max_gas_price_wei() -> u128 {
    500_000_000_000 // 500 gwei
}
fn default_production() -> bool {
    false
}

/// Fully validated configuration. Construction through [`Config::load`] is
/// the only entry point; any knob failing §6's range/shape rules is a
/// startup error, never deferred to first use.
#[derive(Debug, Clone)]
pub struct Config {
    raw: RawConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let args = CliArgs::parse();
        Self::load_from_path(args.config)
    }

    pub fn load_from_path(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let raw: RawConfig = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
                serde_json::from_str(&contents).map_err(|e| ConfigError::JsonParse(path, e))?
            }
            None => Self::from_env_only()?,
        };
        let config = Config { raw };
        config.validate()?;
        Ok(config)
    }

    /// Builds a [`RawConfig`] purely from environment variables, for
    /// deployments that don't use a config file at all.
    fn from_env_only() -> Result<RawConfig, ConfigError> {
        let signer_private_key = std::env::var("SIGNER_PRIVATE_KEY")
            .map_err(|_| ConfigError::InvalidPrivateKey("SIGNER_PRIVATE_KEY not set".into()))?
            .parse::<EvmPrivateKey>()
            .map(LiteralOrEnv)
            .map_err(ConfigError::InvalidPrivateKey)?;
        let rpc_url = std::env::var("RPC_URL").unwrap_or_default();
        let chain_id: u64 = std::env::var("CHAIN_ID").ok().and_then(|s| s.parse().ok()).unwrap_or(8453);
        let mut chains = HashMap::new();
        chains.insert(
            chain_id.to_string(),
            ChainConfig {
                chain_id,
                rpc_url: LiteralOrEnv(Url::parse(&rpc_url).unwrap_or_else(|_| Url::parse("http://localhost:8545").unwrap())),
                splitter_address: std::env::var("SPLITTER_ADDRESS").ok().and_then(|s| s.parse().ok()),
                operating_mode: OperatingMode::Direct,
                treasury: std::env::var("TREASURY_ADDRESS").ok().and_then(|s| s.parse().ok()),
            },
        );
        Ok(RawConfig {
            host: default_host(),
            port: std::env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or_else(default_port),
            signer_private_key,
            chains,
            durable_store_url: std::env::var("DURABLE_STORE_URL").ok(),
            settlement_timeout_ms: std::env::var("SETTLEMENT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_settlement_timeout_ms),
            max_gas_price_wei: std::env::var("MAX_GAS_PRICE_WEI")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_gas_price_wei),
            min_settlement_unit: std::env::var("MIN_SETTLEMENT_UNIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            production: std::env::var("PRODUCTION").map(|v| v == "true").unwrap_or_else(|_| default_production()),
            webhook_hmac_secret: std::env::var("WEBHOOK_HMAC_SECRET").ok(),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(5_000..=300_000).contains(&self.raw.settlement_timeout_ms) {
            return Err(ConfigError::SettlementTimeoutOutOfRange(self.raw.settlement_timeout_ms));
        }
        if self.raw.production && self.raw.durable_store_url.is_none() {
            return Err(ConfigError::DurableStoreRequiredInProduction);
        }
        Ok(())
    }

    pub fn host(&self) -> IpAddr {
        self.raw.host
    }
    pub fn port(&self) -> u16 {
        self.raw.port
    }
    pub fn signer_private_key(&self) -> &B256 {
        &self.raw.signer_private_key.0
    }
    pub fn chains(&self) -> &HashMap<String, ChainConfig> {
        &self.raw.chains
    }
    pub fn chain(&self, network: &str) -> Result<&ChainConfig, ConfigError> {
        self.raw
            .chains
            .get(network)
            .ok_or_else(|| ConfigError::UnknownChain(network.to_string()))
    }
    pub fn durable_store_url(&self) -> Option<&str> {
        self.raw.durable_store_url.as_deref()
    }
    pub fn settlement_timeout_ms(&self) -> u64 {
        self.raw.settlement_timeout_ms
    }
    pub fn max_gas_price_wei(&self) -> u128 {
        self.raw.max_gas_price_wei
    }
    pub fn min_settlement_unit(&self) -> u128 {
        self.raw.min_settlement_unit
    }
    pub fn is_production(&self) -> bool {
        self.raw.production
    }
    pub fn webhook_hmac_secret(&self) -> Option<&str> {
        self.raw.webhook_hmac_secret.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn private_key_requires_0x_prefix_and_32_bytes() {
        assert!("deadbeef".parse::<EvmPrivateKey>().is_err());
        let short = format!("0x{}", "ab".repeat(10));
        assert!(short.parse::<EvmPrivateKey>().is_err());
        let good = format!("0x{}", "ab".repeat(32));
        assert!(good.parse::<EvmPrivateKey>().is_ok());
    }

    #[test]
    fn resolves_dollar_brace_env_reference() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("X402_TEST_VAR", "hello") };
        assert_eq!(resolve_env_reference("${X402_TEST_VAR}").unwrap(), "hello");
        assert_eq!(resolve_env_reference("$X402_TEST_VAR").unwrap(), "hello");
        assert_eq!(resolve_env_reference("literal").unwrap(), "literal");
        unsafe { std::env::remove_var("X402_TEST_VAR") };
    }

    #[test]
    fn production_requires_durable_store_url() {
        let raw = RawConfig {
            host: default_host(),
            port: default_port(),
            signer_private_key: LiteralOrEnv(EvmPrivateKey(B256::ZERO)),
            chains: HashMap::new(),
            durable_store_url: None,
            settlement_timeout_ms: default_settlement_timeout_ms(),
            max_gas_price_wei: default_max_gas_price_wei(),
            min_settlement_unit: 0,
            production: true,
            webhook_hmac_secret: None,
        };
        let config = Config { raw };
        assert!(matches!(config.validate(), Err(ConfigError::DurableStoreRequiredInProduction)));
    }

    #[test]
    fn settlement_timeout_out_of_range_is_rejected() {
        let raw = RawConfig {
            host: default_host(),
            port: default_port(),
            signer_private_key: LiteralOrEnv(EvmPrivateKey(B256::ZERO)),
            chains: HashMap::new(),
            durable_store_url: Some("sqlite://test.db".into()),
            settlement_timeout_ms: 1_000,
            max_gas_price_wei: default_max_gas_price_wei(),
            min_settlement_unit: 0,
            production: false,
            webhook_hmac_secret: None,
        };
        let config = Config { raw };
        assert!(matches!(config.validate(), Err(ConfigError::SettlementTimeoutOutOfRange(1_000))));
    }
}
