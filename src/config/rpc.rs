//! RPC endpoint configuration
//!
//! Resolution order, per chain:
//! 1. Per-chain env vars (`BASE_SEPOLIA_RPC`, `BASE_RPC_URL`) - highest priority
//! 2. `ALCHEMY_API_KEY` - builds URLs for every supported chain
//! 3. Public RPC fallbacks - rate limited, for testing only
//!
//! ```bash
//! export BASE_SEPOLIA_RPC="https://base-sepolia.g.alchemy.com/v2/YOUR_KEY"
//! ```

use std::collections::HashMap;

/// RPC configuration for multiple chains
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URLs indexed by chain ID
    urls: HashMap<u64, String>,
}

/// Chain ID constants
pub mod chains {
    pub const BASE: u64 = 8453;
    pub const BASE_SEPOLIA: u64 = 84532;
}

mod env_vars {
    pub const BASE_RPC_URL: &str = "BASE_RPC_URL";
    pub const BASE_SEPOLIA_RPC: &str = "BASE_SEPOLIA_RPC";
    pub const ALCHEMY_API_KEY: &str = "ALCHEMY_API_KEY";
}

mod public_rpcs {
    pub const BASE: &str = "https://mainnet.base.org";
    pub const BASE_SEPOLIA: &str = "https://sepolia.base.org";
}

impl RpcConfig {
    /// Create RPC config from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create RPC config from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut urls = HashMap::new();

        if let Some(url) = lookup(env_vars::BASE_SEPOLIA_RPC) {
            tracing::debug!("Using BASE_SEPOLIA_RPC for Base Sepolia");
            urls.insert(chains::BASE_SEPOLIA, url);
        }
        if let Some(url) = lookup(env_vars::BASE_RPC_URL) {
            tracing::debug!("Using BASE_RPC_URL for Base");
            urls.insert(chains::BASE, url);
        }

        if let Some(key) = lookup(env_vars::ALCHEMY_API_KEY) {
            urls.entry(chains::BASE_SEPOLIA).or_insert_with(|| {
                tracing::info!("Building Base Sepolia RPC URL from ALCHEMY_API_KEY");
                format!("https://base-sepolia.g.alchemy.com/v2/{}", key)
            });
            urls.entry(chains::BASE).or_insert_with(|| {
                tracing::info!("Building Base RPC URL from ALCHEMY_API_KEY");
                format!("https://base-mainnet.g.alchemy.com/v2/{}", key)
            });
        }

        if !urls.contains_key(&chains::BASE_SEPOLIA) {
            tracing::warn!("No RPC configured for Base Sepolia, using public RPC (rate limited)");
        }
        urls.entry(chains::BASE_SEPOLIA)
            .or_insert_with(|| public_rpcs::BASE_SEPOLIA.to_string());
        urls.entry(chains::BASE)
            .or_insert_with(|| public_rpcs::BASE.to_string());

        Self { urls }
    }

    /// Get RPC URL for a chain
    pub fn get(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
