//! VaultRouter contract client
//!
//! Read-only calls against the on-chain VaultRouter. Every call runs under the retry
//! driver and maps transport and contract errors into [`UpstreamFailure`] so the
//! classification table decides what gets retried. Nothing here signs or submits
//! transactions; execution is returned to the user as unsigned calldata.

use super::UpstreamFailure;
use crate::config::rpc::RpcConfig;
use crate::config::Config;
use crate::policy::{UserPolicy, MAX_BPS};
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::watch;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IVaultRouter {
        struct Policy {
            uint256 maxSlippageBps;
            uint256 maxTradeSize;
            uint256 cooldownSeconds;
            uint256 lastTradeTimestamp;
            address[] tokenAllowlist;
        }

        function simulateTrade(address tokenIn, address tokenOut, uint256 amountIn) external view returns (uint256 amountOut);
        function getPolicy(address user) external view returns (Policy memory);
        function getVaultBalance(address user, address token) external view returns (uint256);
        function executeTrade(address tokenIn, address tokenOut, uint256 amountIn, uint256 minAmountOut) external payable returns (uint256 amountOut);
    }
}

/// Upstream reads the HTTP handlers depend on
#[async_trait]
pub trait TradingBackend: Send + Sync {
    /// Expected output amount for a swap
    async fn simulate_trade(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<U256>;

    /// Policy as recorded on-chain
    async fn user_policy(&self, user: Address) -> Result<UserPolicy>;

    async fn vault_balance(&self, user: Address, token: Address) -> Result<U256>;
}

/// `executeTrade` calldata for the user to sign
pub fn execute_trade_calldata(
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    min_amount_out: U256,
) -> Bytes {
    IVaultRouter::executeTradeCall {
        tokenIn: token_in,
        tokenOut: token_out,
        amountIn: amount_in,
        minAmountOut: min_amount_out,
    }
    .abi_encode()
    .into()
}

/// Lowest acceptable output after `slippage_bps` of slippage
pub fn min_amount_out(amount_out: U256, slippage_bps: u16) -> U256 {
    let bps = U256::from(MAX_BPS.saturating_sub(slippage_bps.min(MAX_BPS)));
    amount_out.saturating_mul(bps) / U256::from(MAX_BPS)
}

impl TryFrom<IVaultRouter::Policy> for UserPolicy {
    type Error = UpstreamFailure;

    fn try_from(raw: IVaultRouter::Policy) -> std::result::Result<Self, Self::Error> {
        let out_of_range =
            |field: &str| UpstreamFailure::new(format!("on-chain policy {} out of range", field));

        let max_slippage_bps = u16::try_from(raw.maxSlippageBps)
            .ok()
            .filter(|bps| *bps <= MAX_BPS)
            .ok_or_else(|| out_of_range("maxSlippageBps"))?;
        let cooldown_seconds =
            u64::try_from(raw.cooldownSeconds).map_err(|_| out_of_range("cooldownSeconds"))?;
        let last_trade_timestamp = i64::try_from(raw.lastTradeTimestamp)
            .map_err(|_| out_of_range("lastTradeTimestamp"))?;

        Ok(UserPolicy {
            max_slippage_bps,
            max_trade_size: raw.maxTradeSize,
            cooldown_seconds,
            last_trade_timestamp,
            token_allowlist: raw.tokenAllowlist,
        })
    }
}

/// [`TradingBackend`] over the VaultRouter contract
pub struct VaultRouterClient {
    contract: IVaultRouter::IVaultRouterInstance<DynProvider>,
    retrier: Retrier,
    shutdown: Option<watch::Receiver<bool>>,
}

impl VaultRouterClient {
    pub fn new(rpc_url: &str, router: Address, retrier: Retrier) -> Result<Self> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        Ok(Self {
            contract: IVaultRouter::new(router, provider),
            retrier,
            shutdown: None,
        })
    }

    /// Build from configuration; `None` when no router address is configured
    pub fn from_config(config: &Config, rpc: &RpcConfig) -> Result<Option<Self>> {
        let Some(router) = config.contracts.vault_router else {
            return Ok(None);
        };
        let chain_id = config.contracts.chain_id;
        let rpc_url = rpc
            .get(chain_id)
            .ok_or_else(|| Error::Config(format!("No RPC URL for chain {}", chain_id)))?;

        tracing::info!(chain_id, router = %router, "Connecting VaultRouter client");
        let retrier = Retrier::new(RetryPolicy::from_config(&config.retry));
        Self::new(rpc_url, router, retrier).map(Some)
    }

    /// Abandon pending retries once `shutdown` flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn router(&self) -> Address {
        *self.contract.address()
    }

    async fn call<T, F, Fut>(&self, method: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, alloy::contract::Error>>,
    {
        let attempt = move || {
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    let failure = UpstreamFailure::from_contract_error(&e);
                    tracing::debug!(method, kind = ?failure.kind(), error = %failure, "VaultRouter call failed");
                    Error::Upstream(failure)
                })
            }
        };

        match &self.shutdown {
            Some(shutdown) => {
                self.retrier
                    .run_until_shutdown(attempt, shutdown.clone())
                    .await
            }
            None => self.retrier.run(attempt).await,
        }
    }
}

#[async_trait]
impl TradingBackend for VaultRouterClient {
    async fn simulate_trade(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<U256> {
        let contract = &self.contract;
        self.call("simulateTrade", || async move {
            contract
                .simulateTrade(token_in, token_out, amount_in)
                .call()
                .await
        })
        .await
    }

    async fn user_policy(&self, user: Address) -> Result<UserPolicy> {
        let contract = &self.contract;
        let raw = self
            .call("getPolicy", || async move { contract.getPolicy(user).call().await })
            .await?;
        Ok(UserPolicy::try_from(raw)?)
    }

    async fn vault_balance(&self, user: Address, token: Address) -> Result<U256> {
        let contract = &self.contract;
        self.call("getVaultBalance", || async move {
            contract.getVaultBalance(user, token).call().await
        })
        .await
    }
}

impl std::fmt::Debug for VaultRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRouterClient")
            .field("router", self.contract.address())
            .field("retry", self.retrier.policy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    const WETH: Address = address!("4200000000000000000000000000000000000006");

    #[test]
    fn calldata_uses_execute_trade_selector() {
        let data = execute_trade_calldata(
            Address::ZERO,
            WETH,
            U256::from(1_000u64),
            U256::from(990u64),
        );
        let selector = keccak256("executeTrade(address,address,uint256,uint256)");
        assert_eq!(&data[..4], &selector[..4]);
        // selector + 4 static words
        assert_eq!(data.len(), 4 + 4 * 32);

        let decoded = IVaultRouter::executeTradeCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.tokenOut, WETH);
        assert_eq!(decoded.minAmountOut, U256::from(990u64));
    }

    #[test]
    fn min_amount_out_applies_slippage() {
        let out = U256::from(1_000_000u64);
        assert_eq!(min_amount_out(out, 100), U256::from(990_000u64));
        assert_eq!(min_amount_out(out, 0), out);
        assert_eq!(min_amount_out(out, 10_000), U256::ZERO);
        // clamped at 100%
        assert_eq!(min_amount_out(out, 20_000), U256::ZERO);
    }

    #[test]
    fn on_chain_policy_converts() {
        let raw = IVaultRouter::Policy {
            maxSlippageBps: U256::from(50u64),
            maxTradeSize: U256::from(5_000_000u64),
            cooldownSeconds: U256::from(120u64),
            lastTradeTimestamp: U256::from(1_700_000_000u64),
            tokenAllowlist: vec![WETH],
        };
        let policy = UserPolicy::try_from(raw).unwrap();
        assert_eq!(policy.max_slippage_bps, 50);
        assert_eq!(policy.cooldown_seconds, 120);
        assert_eq!(policy.token_allowlist, vec![WETH]);
    }

    #[test]
    fn on_chain_policy_out_of_range_is_rejected() {
        let raw = IVaultRouter::Policy {
            maxSlippageBps: U256::from(10_001u64),
            maxTradeSize: U256::ZERO,
            cooldownSeconds: U256::ZERO,
            lastTradeTimestamp: U256::ZERO,
            tokenAllowlist: Vec::new(),
        };
        let err = UserPolicy::try_from(raw).unwrap_err();
        assert!(err.message.contains("maxSlippageBps"));
    }

    #[test]
    fn from_config_without_router_is_none() {
        let config = Config::default();
        let rpc = RpcConfig::from_lookup(|_| None);
        assert!(VaultRouterClient::from_config(&config, &rpc).unwrap().is_none());
    }

    #[test]
    fn new_rejects_bad_url() {
        let err = VaultRouterClient::new("not a url", WETH, Retrier::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
