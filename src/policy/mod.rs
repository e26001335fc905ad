//! Trading-policy compliance
//!
//! A user's [`UserPolicy`] holds their configured limits. Before any response that
//! would lead to execution, the [`ComplianceEngine`] evaluates a [`TradeIntent`]
//! against it and reports every violated limit, not just the first one.

mod engine;
mod store;
mod types;

pub use engine::ComplianceEngine;
pub use store::{InMemoryPolicyStore, PolicyStore};
pub use types::{PolicyUpdate, PolicyVerdict, TradeIntent, UserPolicy};

/// Largest representable basis-point value (100%)
pub const MAX_BPS: u16 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("maxSlippageBps must be at most {MAX_BPS}, got {0}")]
    SlippageOutOfRange(u16),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Serde adapter for `U256` as a decimal string
///
/// Deserialization also accepts plain JSON integers so hand-written config files can
/// use `"max_trade_size": 5000000`.
pub mod decimal_u256 {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn parse(s: &str) -> Result<U256, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("not a decimal integer: {:?}", s));
        }
        U256::from_str_radix(trimmed, 10).map_err(|e| e.to_string())
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => parse(&s).map_err(de::Error::custom),
            Repr::Number(n) => Ok(U256::from(n)),
        }
    }

    /// Same encoding for `Option<U256>`; use together with `#[serde(default)]`
    pub mod option {
        use super::Repr;
        use alloy::primitives::U256;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<U256>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<U256>, D::Error> {
            match Option::<Repr>::deserialize(deserializer)? {
                Some(Repr::Text(s)) => super::parse(&s).map(Some).map_err(de::Error::custom),
                Some(Repr::Number(n)) => Ok(Some(U256::from(n))),
                None => Ok(None),
            }
        }
    }
}
