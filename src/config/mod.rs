//! Configuration for the payment gate and compliance engine
//!
//! A [`Config`] is loaded once at startup (JSON file or defaults), overlaid with
//! environment variables, and then handed by reference to the components that need
//! it. Nothing reads configuration from ambient global state after that.

pub mod rpc;

use crate::policy::{decimal_u256, MAX_BPS};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

pub use rpc::RpcConfig;

/// Environment variable names
pub mod env_vars {
    pub const X402_WALLET_ADDRESS: &str = "X402_WALLET_ADDRESS";
    pub const X402_USDC_ADDRESS: &str = "X402_USDC_ADDRESS";
    pub const X402_NETWORK: &str = "X402_NETWORK";
    pub const X402_AMOUNT: &str = "X402_AMOUNT";
    pub const VAULT_ROUTER_ADDRESS: &str = "VAULT_ROUTER_ADDRESS";
    pub const PORT: &str = "PORT";
    pub const PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";
    pub const PAYER_PRIVATE_KEY: &str = "PAYER_PRIVATE_KEY";
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Base URL advertised in payment challenges; defaults to `http://localhost:<port>`
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3000,
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn resource_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

/// Raw payment settings as written by the operator
///
/// Prices are decimal amounts in whole asset units (e.g. `"0.001"` USDC); they are
/// validated and converted when the gate is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Recipient wallet
    pub pay_to: String,
    /// Accepted asset contract
    pub asset: String,
    /// CAIP-2 network id, e.g. `eip155:84532`
    pub network: String,
    /// Price for operations without an override
    pub default_price: String,
    /// Per-operation overrides keyed by path (e.g. `/simulate`)
    #[serde(default)]
    pub prices: BTreeMap<String, String>,
}

/// Retry settings for upstream RPC calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
            retryable_statuses: crate::retry::DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

/// Policy applied to users that never configured one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Basis points
    pub max_slippage_bps: u16,
    /// Smallest unit of the input asset
    #[serde(with = "decimal_u256")]
    pub max_trade_size: U256,
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub token_allowlist: Vec<Address>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            max_slippage_bps: 100,                                    // 1%
            max_trade_size: U256::from(1_000_000_000_000_000_000u64), // 1e18
            cooldown_seconds: 60,
            token_allowlist: Vec::new(),
        }
    }
}

impl PolicyDefaults {
    pub fn validate(&self) -> Result<()> {
        if self.max_slippage_bps > MAX_BPS {
            return Err(Error::Config(format!(
                "policy_defaults.max_slippage_bps {} exceeds {}",
                self.max_slippage_bps, MAX_BPS
            )));
        }
        Ok(())
    }
}

/// Upstream contract settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub vault_router: Option<Address>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            chain_id: rpc::chains::BASE_SEPOLIA,
            vault_router: None,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// `None` disables metering entirely
    #[serde(default)]
    pub payment: Option<PaymentSettings>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy_defaults: PolicyDefaults,
    #[serde(default)]
    pub contracts: ContractsConfig,
}

impl Config {
    /// Load from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                let config: Self = serde_json::from_str(&content).map_err(|e| {
                    Error::Config(format!("Invalid config {}: {}", path.display(), e))
                })?;
                config.policy_defaults.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlay variables from an arbitrary lookup
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup(env_vars::PORT) {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PORT: {}", port)))?;
        }
        if let Some(url) = lookup(env_vars::PUBLIC_BASE_URL) {
            self.server.public_base_url = Some(url);
        }
        if let Some(addr) = lookup(env_vars::VAULT_ROUTER_ADDRESS) {
            let addr = Address::from_str(&addr)
                .map_err(|e| Error::Config(format!("Invalid VAULT_ROUTER_ADDRESS: {}", e)))?;
            self.contracts.vault_router = Some(addr);
        }

        let pay_to = lookup(env_vars::X402_WALLET_ADDRESS);
        let asset = lookup(env_vars::X402_USDC_ADDRESS);
        let network = lookup(env_vars::X402_NETWORK);
        let price = lookup(env_vars::X402_AMOUNT);

        match self.payment.as_mut() {
            Some(settings) => {
                if let Some(v) = pay_to {
                    settings.pay_to = v;
                }
                if let Some(v) = asset {
                    settings.asset = v;
                }
                if let Some(v) = network {
                    settings.network = v;
                }
                if let Some(v) = price {
                    settings.default_price = v;
                }
            }
            None => match (pay_to, asset, network, price) {
                (Some(pay_to), Some(asset), Some(network), Some(default_price)) => {
                    self.payment = Some(PaymentSettings {
                        pay_to,
                        asset,
                        network,
                        default_price,
                        prices: BTreeMap::new(),
                    });
                }
                (None, None, None, None) => {}
                _ => {
                    tracing::warn!(
                        "Partial X402_* payment configuration in environment; \
                         all of X402_WALLET_ADDRESS, X402_USDC_ADDRESS, X402_NETWORK \
                         and X402_AMOUNT are required. Metering stays disabled."
                    );
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deserialize_defaults() {
        let parsed: Config = serde_json::from_value(serde_json::json!({})).expect("parse config");
        assert!(parsed.payment.is_none());
        assert_eq!(parsed.retry, RetryConfig::default());
        assert_eq!(parsed.server.port, 3000);
        assert_eq!(parsed.contracts.chain_id, rpc::chains::BASE_SEPOLIA);
    }

    #[test]
    fn deserialize_explicit() {
        let value = serde_json::json!({
            "server": { "bind_addr": "127.0.0.1", "port": 8080 },
            "payment": {
                "pay_to": "0x00000000000000000000000000000000000000aa",
                "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                "network": "eip155:84532",
                "default_price": "0.001",
                "prices": { "/execute": "0.01" }
            },
            "policy_defaults": {
                "max_slippage_bps": 50,
                "max_trade_size": "5000000",
                "cooldown_seconds": 300
            }
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        let payment = parsed.payment.expect("payment settings");
        assert_eq!(payment.prices.get("/execute").map(String::as_str), Some("0.01"));
        assert_eq!(parsed.policy_defaults.max_trade_size, U256::from(5_000_000u64));
        assert!(parsed.policy_defaults.token_allowlist.is_empty());
        assert_eq!(parsed.server.resource_base_url(), "http://localhost:8080");
    }

    #[test]
    fn env_builds_payment_settings_when_complete() {
        let mut config = Config::default();
        config
            .apply_env_with(lookup(&[
                ("X402_WALLET_ADDRESS", "0x00000000000000000000000000000000000000aa"),
                ("X402_USDC_ADDRESS", "0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
                ("X402_NETWORK", "eip155:84532"),
                ("X402_AMOUNT", "0.001"),
                ("PORT", "4000"),
            ]))
            .expect("apply env");

        let payment = config.payment.expect("payment settings");
        assert_eq!(payment.default_price, "0.001");
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn partial_env_leaves_metering_disabled() {
        let mut config = Config::default();
        config
            .apply_env_with(lookup(&[(
                "X402_WALLET_ADDRESS",
                "0x00000000000000000000000000000000000000aa",
            )]))
            .expect("apply env");
        assert!(config.payment.is_none());
    }

    #[test]
    fn env_rejects_bad_router_address() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(lookup(&[("VAULT_ROUTER_ADDRESS", "not-an-address")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "retry": {{ "max_retries": 1, "base_delay_ms": 10, "max_delay_ms": 100, "jitter_ms": 0, "retryable_statuses": [503] }} }}"#).unwrap();

        let config = Config::load(Some(file.path())).expect("load config");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.retryable_statuses, vec![503]);
    }

    #[test]
    fn load_rejects_slippage_default_above_100_percent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "policy_defaults": {{ "max_slippage_bps": 20000, "max_trade_size": "1", "cooldown_seconds": 0 }} }}"#
        )
        .unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("max_slippage_bps")));
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let config = Config::load(None).expect("defaults");
        assert!(config.payment.is_none());
    }
}
