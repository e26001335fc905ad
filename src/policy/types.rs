use super::{decimal_u256, PolicyError, MAX_BPS};
use crate::config::PolicyDefaults;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Per-user trading limits
///
/// Values are never edited in place: [`UserPolicy::apply`] and
/// [`UserPolicy::with_last_trade`] return a new policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPolicy {
    /// Basis points, 0..=10000
    pub max_slippage_bps: u16,
    /// Smallest unit of the input asset
    #[serde(with = "decimal_u256")]
    pub max_trade_size: U256,
    pub cooldown_seconds: u64,
    /// Unix seconds; 0 when the user never traded
    pub last_trade_timestamp: i64,
    /// Empty means every output token is allowed
    pub token_allowlist: Vec<Address>,
}

impl From<&PolicyDefaults> for UserPolicy {
    fn from(defaults: &PolicyDefaults) -> Self {
        Self {
            max_slippage_bps: defaults.max_slippage_bps,
            max_trade_size: defaults.max_trade_size,
            cooldown_seconds: defaults.cooldown_seconds,
            last_trade_timestamp: 0,
            token_allowlist: dedup(defaults.token_allowlist.clone()),
        }
    }
}

impl UserPolicy {
    /// Produce the policy that results from applying a validated delta
    pub fn apply(&self, update: &PolicyUpdate) -> Result<UserPolicy, PolicyError> {
        update.validate()?;

        let mut next = self.clone();
        if let Some(bps) = update.max_slippage_bps {
            next.max_slippage_bps = bps;
        }
        if let Some(size) = update.max_trade_size {
            next.max_trade_size = size;
        }
        if let Some(cooldown) = update.cooldown_seconds {
            next.cooldown_seconds = cooldown;
        }
        if let Some(allowlist) = &update.token_allowlist {
            next.token_allowlist = dedup(allowlist.clone());
        }
        Ok(next)
    }

    pub fn with_last_trade(&self, timestamp: i64) -> UserPolicy {
        UserPolicy {
            last_trade_timestamp: timestamp,
            ..self.clone()
        }
    }

    pub fn allows_token(&self, token: &Address) -> bool {
        self.token_allowlist.is_empty() || self.token_allowlist.contains(token)
    }
}

/// Partial change to a [`UserPolicy`]; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u16>,
    #[serde(
        default,
        with = "decimal_u256::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_trade_size: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_allowlist: Option<Vec<Address>>,
}

impl PolicyUpdate {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some(bps) = self.max_slippage_bps {
            if bps > MAX_BPS {
                return Err(PolicyError::SlippageOutOfRange(bps));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.max_slippage_bps.is_none()
            && self.max_trade_size.is_none()
            && self.cooldown_seconds.is_none()
            && self.token_allowlist.is_none()
    }
}

/// A structured trade proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIntent {
    pub token_in: Address,
    pub token_out: Address,
    #[serde(with = "decimal_u256")]
    pub amount_in: U256,
    /// Slippage the caller is willing to accept, if stated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u16>,
}

/// Outcome of a compliance check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyVerdict {
    pub compliant: bool,
    pub violations: Vec<String>,
}

impl PolicyVerdict {
    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            compliant: violations.is_empty(),
            violations,
        }
    }
}

/// Addresses compare on their bytes, so checksummed and lowercase input collapse
fn dedup(addresses: Vec<Address>) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::with_capacity(addresses.len());
    for addr in addresses {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn base() -> UserPolicy {
        UserPolicy::from(&PolicyDefaults::default())
    }

    #[test]
    fn defaults_convert() {
        let policy = base();
        assert_eq!(policy.max_slippage_bps, 100);
        assert_eq!(policy.cooldown_seconds, 60);
        assert_eq!(policy.last_trade_timestamp, 0);
        assert!(policy.token_allowlist.is_empty());
    }

    #[test]
    fn apply_returns_new_value_and_leaves_original() {
        let original = base();
        let update = PolicyUpdate {
            max_slippage_bps: Some(250),
            cooldown_seconds: Some(600),
            ..Default::default()
        };

        let next = original.apply(&update).unwrap();

        assert_eq!(next.max_slippage_bps, 250);
        assert_eq!(next.cooldown_seconds, 600);
        assert_eq!(next.max_trade_size, original.max_trade_size);
        assert_eq!(original.max_slippage_bps, 100);
    }

    #[test]
    fn apply_rejects_slippage_above_100_percent() {
        let update = PolicyUpdate {
            max_slippage_bps: Some(10_001),
            ..Default::default()
        };
        assert_eq!(
            base().apply(&update).unwrap_err(),
            PolicyError::SlippageOutOfRange(10_001)
        );

        let boundary = PolicyUpdate {
            max_slippage_bps: Some(10_000),
            ..Default::default()
        };
        assert!(base().apply(&boundary).is_ok());
    }

    #[test]
    fn allowlist_duplicates_collapse() {
        let usdc = address!("036cbd53842c5426634e7929541ec2318f3dcf7e");
        let weth = address!("4200000000000000000000000000000000000006");
        let update: PolicyUpdate = serde_json::from_value(serde_json::json!({
            "tokenAllowlist": [
                "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                "0x036cbd53842c5426634e7929541ec2318f3dcf7e",
                "0x4200000000000000000000000000000000000006"
            ]
        }))
        .unwrap();

        let next = base().apply(&update).unwrap();
        assert_eq!(next.token_allowlist, vec![usdc, weth]);
    }

    #[test]
    fn policy_json_is_camel_case() {
        let policy = base().with_last_trade(1_700_000_000);
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["maxSlippageBps"], 100);
        assert_eq!(value["maxTradeSize"], "1000000000000000000");
        assert_eq!(value["lastTradeTimestamp"], 1_700_000_000i64);
        assert!(value["tokenAllowlist"].as_array().unwrap().is_empty());
    }

    #[test]
    fn intent_parses_decimal_amount() {
        let intent: TradeIntent = serde_json::from_value(serde_json::json!({
            "tokenIn": "0x0000000000000000000000000000000000000000",
            "tokenOut": "0x4200000000000000000000000000000000000006",
            "amountIn": "2000000000000000000"
        }))
        .unwrap();
        assert_eq!(intent.amount_in, U256::from(2_000_000_000_000_000_000u128));
        assert_eq!(intent.max_slippage_bps, None);
    }

    #[test]
    fn empty_update() {
        assert!(PolicyUpdate::default().is_empty());
    }
}
