//! Payment asset registry
//!
//! Metadata for the stablecoins the gate accepts: decimals for price conversion and
//! the EIP-712 domain name/version advertised in payment challenges.

use crate::config::rpc::chains;
use alloy::primitives::{address, Address};
use std::collections::HashMap;

/// Asset metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub decimals: u8,
    /// EIP-712 domain name of the token contract
    pub eip712_name: &'static str,
    /// EIP-712 domain version of the token contract
    pub eip712_version: &'static str,
}

impl TokenInfo {
    pub const fn usdc() -> Self {
        Self {
            symbol: "USDC",
            decimals: 6,
            eip712_name: "USDC",
            eip712_version: "2",
        }
    }
}

/// Well-known asset addresses
pub mod addresses {
    use super::*;

    pub const USDC_BASE: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
    pub const USDC_BASE_SEPOLIA: Address = address!("036cbd53842c5426634e7929541ec2318f3dcf7e");
    pub const ZERO_ADDRESS: Address = address!("0000000000000000000000000000000000000000");
}

/// Lookups by `(chain_id, asset)`
pub struct TokenRegistry {
    tokens: HashMap<(u64, Address), TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        use addresses::*;

        let mut tokens = HashMap::new();
        tokens.insert((chains::BASE, USDC_BASE), TokenInfo::usdc());
        tokens.insert((chains::BASE_SEPOLIA, USDC_BASE_SEPOLIA), TokenInfo::usdc());

        Self { tokens }
    }

    pub fn get(&self, chain_id: u64, asset: &Address) -> Option<&TokenInfo> {
        self.tokens.get(&(chain_id, *asset))
    }

    /// Known metadata, or USDC's for unregistered assets
    ///
    /// Operators pointing the gate at a custom deployment get 6 decimals and the
    /// `USDC`/`2` domain, which is what Circle's contracts use on every chain.
    pub fn get_or_default(&self, chain_id: u64, asset: &Address) -> TokenInfo {
        match self.get(chain_id, asset) {
            Some(info) => *info,
            None => {
                tracing::debug!(chain_id, asset = %asset, "Unregistered payment asset, assuming USDC metadata");
                TokenInfo::usdc()
            }
        }
    }

    /// Canonical USDC deployment for a chain
    pub fn usdc_for_chain(&self, chain_id: u64) -> Option<Address> {
        self.tokens
            .iter()
            .find(|((chain, _), info)| *chain == chain_id && info.symbol == "USDC")
            .map(|((_, addr), _)| *addr)
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: std::sync::OnceLock<TokenRegistry> = std::sync::OnceLock::new();

/// Get the global token registry
pub fn registry() -> &'static TokenRegistry {
    REGISTRY.get_or_init(TokenRegistry::new)
}
