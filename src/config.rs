// src/config.rs

//! # Configuration
//!
//! A single JSON document describes the token, the two contract deployments,
//! the wallet endpoint and the timing knobs of the client. Every section has
//! defaults matching the production deployment, so a config file only needs
//! to name what it overrides.

use crate::exchange::quote::Currency;
use ethers::types::Address;
use eyre::{Result, WrapErr};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// EIP-1193 style JSON-RPC endpoint (wallet bridge or node with unlocked accounts).
    pub rpc_url: String,
    pub token: TokenConfig,
    pub contracts: ContractAddresses,
    pub retry: RetrySettings,
    pub polling: PollingSettings,
    pub transactions: TransactionSettings,
    pub exchange: ExchangeSettings,
    /// Where advisory annotations are persisted. `None` keeps them in memory.
    pub annotations_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            rpc_url: "http://127.0.0.1:1248".to_string(),
            token: TokenConfig::default(),
            contracts: ContractAddresses::default(),
            retry: RetrySettings::default(),
            polling: PollingSettings::default(),
            transactions: TransactionSettings::default(),
            exchange: ExchangeSettings::default(),
            annotations_path: Some(PathBuf::from("streamfi-annotations.json")),
        }
    }
}

impl Config {
    /// Load configuration from a single JSON file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .wrap_err_with(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Self = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config from JSON: {}", path.as_ref().display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Self::from_file(path).await
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.decimals > 36 {
            eyre::bail!("token decimals out of range: {}", self.token.decimals);
        }
        if self.retry.max_retries == 0 {
            eyre::bail!("retry.max_retries must be at least 1");
        }
        if self.polling.stream_interval_ms == 0 || self.polling.exchange_interval_ms == 0 {
            eyre::bail!("polling intervals must be positive");
        }
        for currency in Currency::ALL {
            if !self.exchange.rates.contains_key(&currency) {
                eyre::bail!("exchange.rates is missing {}", currency);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub contract_address: Address,
    pub chain_id: u64,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
    pub explorer_url: String,
    pub network_name: String,
    /// Advertised to the wallet when the chain has to be added.
    pub public_rpc_url: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            contract_address: parse_address("0x8ccedbAe4916b79da7F3F612EfB2EB93A2bFD6cF"),
            chain_id: 1,
            decimals: 18,
            symbol: "MNEE".to_string(),
            name: "MNEE USD Stablecoin".to_string(),
            explorer_url: "https://etherscan.io".to_string(),
            network_name: "Ethereum Mainnet".to_string(),
            public_rpc_url: "https://eth.llamarpc.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractAddresses {
    pub stream_fi: Address,
    pub buy_sell: Address,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            stream_fi: parse_address("0x65fEEd327e7d9a84df26446c48a46B42853cD074"),
            buy_sell: parse_address("0x69c29f93eBc486e98E66d901bA2C88B8FD5cBc67"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub stream_interval_ms: u64,
    pub stream_initial_delay_ms: u64,
    pub exchange_interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            stream_interval_ms: 10_000,
            stream_initial_delay_ms: 1_000,
            exchange_interval_ms: 3_000,
        }
    }
}

impl PollingSettings {
    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn stream_initial_delay(&self) -> Duration {
        Duration::from_millis(self.stream_initial_delay_ms)
    }

    pub fn exchange_interval(&self) -> Duration {
        Duration::from_millis(self.exchange_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    pub confirmation_timeout_secs: u64,
    pub approval_timeout_secs: u64,
    /// Waits between allowance re-checks after an approval wait failed.
    pub approval_recheck_delays_ms: Vec<u64>,
    pub fallback_approve_gas: u64,
    pub fallback_fund_gas: u64,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 120,
            approval_timeout_secs: 90,
            approval_recheck_delays_ms: (0..6).map(|attempt| 5_000 + attempt * 2_000).collect(),
            fallback_approve_gas: 100_000,
            fallback_fund_gas: 300_000,
        }
    }
}

impl TransactionSettings {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn approval_recheck_delays(&self) -> Vec<Duration> {
        self.approval_recheck_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Units of each fiat currency per USD.
    pub rates: BTreeMap<Currency, Decimal>,
    pub token_price_usd: Decimal,
    pub fee_percent: Decimal,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::Usd, Decimal::from(1));
        rates.insert(Currency::Ugx, Decimal::from(3500));
        rates.insert(Currency::Kes, Decimal::from(128));
        Self {
            rates,
            token_price_usd: Decimal::from(1),
            fee_percent: Decimal::from(2),
        }
    }
}

fn parse_address(s: &str) -> Address {
    Address::from_str(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.token.chain_id, 1);
        assert_eq!(cfg.token.decimals, 18);
        assert_ne!(cfg.contracts.stream_fi, Address::zero());
        assert_ne!(cfg.contracts.buy_sell, Address::zero());
        assert_eq!(cfg.transactions.approval_recheck_delays_ms, vec![5000, 7000, 9000, 11000, 13000, 15000]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "rpc_url": "http://localhost:8545", "retry": { "base_delay_ms": 500 } }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.rpc_url, "http://localhost:8545");
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.polling.stream_interval_ms, 10_000);
        assert_eq!(cfg.exchange.rates.get(&Currency::Ugx), Some(&Decimal::from(3500)));
    }

    #[tokio::test]
    async fn test_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = Config::from_file(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[tokio::test]
    async fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/streamfi.json");
        let cfg = Config::from_file(&path).await.unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.contracts.stream_fi, defaults.contracts.stream_fi);
        assert_eq!(cfg.token.contract_address, defaults.token.contract_address);
        assert_eq!(cfg.exchange.rates, defaults.exchange.rates);
        assert_eq!(cfg.transactions.fallback_fund_gas, 300_000);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut cfg = Config::default();
        cfg.retry.max_retries = 0;
        assert!(cfg.validate().is_err());
    }
}
