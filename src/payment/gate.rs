//! Payment gate
//!
//! Wraps priced operations. A request carrying a valid proof for the exact price of
//! the operation passes through; anything else gets a [`PaymentChallenge`] that a
//! client can parse to build a matching proof. The challenge looks the same whether
//! the proof was missing, undecodable or invalid.

use super::proof::{
    chain_id_from_network, ExpectedPayment, PaymentProof, FRESHNESS_WINDOW_SECS, X402_VERSION,
};
use super::verifier::PaymentVerifier;
use crate::config::PaymentSettings;
use crate::tokens::{self, TokenInfo};
use crate::{Error, Result};
use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;

/// Request header carrying the base64 proof
pub const PAYMENT_HEADER: &str = "payment-signature";

/// Validated, immutable payment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfig {
    pub pay_to: Address,
    pub asset: Address,
    pub network: String,
    pub chain_id: u64,
    pub asset_info: TokenInfo,
    /// Smallest units
    pub default_amount: U256,
    /// Smallest units, keyed by operation path
    pub prices: BTreeMap<String, U256>,
}

impl PaymentConfig {
    pub fn from_settings(settings: &PaymentSettings) -> Result<Self> {
        let pay_to = parse_config_address("pay_to", &settings.pay_to)?;
        let asset = parse_config_address("asset", &settings.asset)?;
        let chain_id = chain_id_from_network(&settings.network)
            .map_err(|e| Error::Config(e.to_string()))?;
        let asset_info = tokens::registry().get_or_default(chain_id, &asset);

        let default_amount = to_smallest_unit(&settings.default_price, asset_info.decimals)?;
        let prices = settings
            .prices
            .iter()
            .map(|(op, price)| Ok((op.clone(), to_smallest_unit(price, asset_info.decimals)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            pay_to,
            asset,
            network: settings.network.clone(),
            chain_id,
            asset_info,
            default_amount,
            prices,
        })
    }

    /// Price of an operation in smallest units
    pub fn amount_for(&self, operation: &str) -> U256 {
        self.prices
            .get(operation)
            .copied()
            .unwrap_or(self.default_amount)
    }

    pub fn expected_for(&self, operation: &str) -> ExpectedPayment {
        ExpectedPayment {
            pay_to: self.pay_to,
            asset: self.asset,
            network: self.network.clone(),
            amount: self.amount_for(operation),
        }
    }
}

fn parse_config_address(field: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid payment {} address {:?}: {}", field, raw, e)))
}

fn to_smallest_unit(price: &str, decimals: u8) -> Result<U256> {
    match parse_units(price.trim(), decimals) {
        Ok(ParseUnits::U256(amount)) => Ok(amount),
        Ok(ParseUnits::I256(_)) => Err(Error::Config(format!(
            "Price must not be negative: {}",
            price
        ))),
        Err(e) => Err(Error::Config(format!("Invalid price {:?}: {}", price, e))),
    }
}

/// 402 response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub x402_version: u32,
    pub error: String,
    pub resource: ChallengeResource,
    pub accepts: Vec<PaymentRequirements>,
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResource {
    pub url: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Smallest units as a decimal string
    pub amount: String,
    pub asset: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub extra: AssetDomain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetDomain {
    pub name: String,
    pub version: String,
}

/// Outcome of gating one request
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Pass,
    Challenge(PaymentChallenge),
}

pub struct PaymentGate {
    config: Option<PaymentConfig>,
    resource_base_url: String,
    verifier: PaymentVerifier,
}

impl PaymentGate {
    /// `None` disables metering: every operation passes.
    pub fn new(config: Option<PaymentConfig>, resource_base_url: impl Into<String>) -> Self {
        let resource_base_url = resource_base_url.into();
        match &config {
            Some(config) => tracing::info!(
                pay_to = %config.pay_to,
                asset = %config.asset,
                network = %config.network,
                default_amount = %config.default_amount,
                priced_operations = config.prices.len(),
                "Payment gate enabled"
            ),
            None => tracing::warn!(
                "Payment gate not configured, all operations are served without payment"
            ),
        }
        Self {
            config,
            resource_base_url: resource_base_url.trim_end_matches('/').to_string(),
            verifier: PaymentVerifier::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&PaymentConfig> {
        self.config.as_ref()
    }

    /// Gate `operation`, advertising the operation path itself as the resource
    pub fn evaluate(&self, operation: &str, header: Option<&str>) -> GateDecision {
        self.evaluate_at(
            operation,
            operation,
            header,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Gate `operation`, advertising `resource_path` in the challenge
    ///
    /// `operation` selects the price; `resource_path` is the path the client called.
    pub fn evaluate_at(
        &self,
        operation: &str,
        resource_path: &str,
        header: Option<&str>,
        now: i64,
    ) -> GateDecision {
        let Some(config) = &self.config else {
            return GateDecision::Pass;
        };

        let expected = config.expected_for(operation);
        let paid = match header {
            None => {
                tracing::debug!(operation, "No payment proof attached");
                false
            }
            Some(value) => match PaymentProof::decode_header(value) {
                Ok(proof) => self.verifier.verify_at(&proof, &expected, now),
                Err(e) => {
                    tracing::debug!(operation, error = %e, "Undecodable payment proof");
                    false
                }
            },
        };

        if paid {
            GateDecision::Pass
        } else {
            GateDecision::Challenge(self.challenge(config, &expected, resource_path))
        }
    }

    /// Run `f` only when the request is paid for
    pub async fn protect<F, Fut, T>(
        &self,
        operation: &str,
        header: Option<&str>,
        f: F,
    ) -> std::result::Result<T, PaymentChallenge>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.evaluate(operation, header) {
            GateDecision::Pass => Ok(f().await),
            GateDecision::Challenge(challenge) => Err(challenge),
        }
    }

    fn challenge(
        &self,
        config: &PaymentConfig,
        expected: &ExpectedPayment,
        resource_path: &str,
    ) -> PaymentChallenge {
        PaymentChallenge {
            x402_version: X402_VERSION,
            error: "Payment required to access this resource".to_string(),
            resource: ChallengeResource {
                url: format!("{}{}", self.resource_base_url, resource_path),
                description: format!("Payment required for {}", resource_path),
                mime_type: "application/json".to_string(),
            },
            accepts: vec![PaymentRequirements {
                scheme: "exact".to_string(),
                network: expected.network.clone(),
                amount: expected.amount.to_string(),
                asset: expected.asset.to_string(),
                pay_to: expected.pay_to.to_string(),
                max_timeout_seconds: FRESHNESS_WINDOW_SECS as u64,
                extra: AssetDomain {
                    name: config.asset_info.eip712_name.to_string(),
                    version: config.asset_info.eip712_version.to_string(),
                },
            }],
            extensions: serde_json::Map::new(),
        }
    }
}

impl std::fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGate")
            .field("enabled", &self.is_enabled())
            .field("resource_base_url", &self.resource_base_url)
            .finish()
    }
}
