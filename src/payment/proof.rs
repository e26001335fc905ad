//! Payment proof wire format and EIP-712 typed data

use super::ProofError;
use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Protocol version accepted by the gate
pub const X402_VERSION: u32 = 2;

/// Maximum age of a proof, in seconds
pub const FRESHNESS_WINDOW_SECS: i64 = 600;

pub const EIP712_DOMAIN_NAME: &str = "x402 Payment";
pub const EIP712_DOMAIN_VERSION: &str = "2";

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct Payment {
        address payer;
        address payTo;
        uint256 amount;
        address asset;
        uint256 timestamp;
    }
}

/// A signed payment claim, as sent by the client
///
/// Addresses and the amount stay as the client wrote them; the verifier decides
/// whether they match. Decoding only fails on malformed transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u32,
    pub payer: String,
    pub pay_to: String,
    /// Smallest-unit integer as a decimal string
    pub amount: String,
    pub asset: String,
    /// CAIP-2 id, e.g. `eip155:84532`
    pub network: String,
    /// 0x-prefixed 65-byte signature
    pub signature: String,
    /// Unix seconds at creation
    pub timestamp: u64,
}

impl PaymentProof {
    /// Decode a `PAYMENT-SIGNATURE` header value
    pub fn decode_header(value: &str) -> Result<Self, ProofError> {
        let raw = STANDARD.decode(value.trim())?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Encode as a `PAYMENT-SIGNATURE` header value
    pub fn encode_header(&self) -> Result<String, ProofError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

/// What the gate requires for one priced operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPayment {
    pub pay_to: Address,
    pub asset: Address,
    pub network: String,
    pub amount: U256,
}

/// Chain id from a CAIP-2 `eip155:<id>` network string
pub fn chain_id_from_network(network: &str) -> Result<u64, ProofError> {
    network
        .strip_prefix("eip155:")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| ProofError::InvalidNetwork(network.to_string()))
}

/// Signing domain; the accepted asset is the verifying contract
pub fn payment_domain(chain_id: u64, asset: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed(EIP712_DOMAIN_NAME)),
        Some(Cow::Borrowed(EIP712_DOMAIN_VERSION)),
        Some(U256::from(chain_id)),
        Some(asset),
        None,
    )
}

impl Payment {
    pub fn signing_hash(&self, chain_id: u64, verifying_asset: Address) -> B256 {
        self.eip712_signing_hash(&payment_domain(chain_id, verifying_asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PaymentProof {
        PaymentProof {
            x402_version: 2,
            payer: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            pay_to: "0x00000000000000000000000000000000000000aa".to_string(),
            amount: "1000".to_string(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            network: "eip155:84532".to_string(),
            signature: "0x00".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn json_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        for key in [
            "x402Version",
            "payer",
            "payTo",
            "amount",
            "asset",
            "network",
            "signature",
            "timestamp",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn header_roundtrip() {
        let proof = sample();
        let header = proof.encode_header().unwrap();
        assert_eq!(PaymentProof::decode_header(&header).unwrap(), proof);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            PaymentProof::decode_header("***not base64***"),
            Err(ProofError::Base64(_))
        ));
        let not_json = STANDARD.encode("hello");
        assert!(matches!(
            PaymentProof::decode_header(&not_json),
            Err(ProofError::Json(_))
        ));
    }

    #[test]
    fn network_parsing() {
        assert_eq!(chain_id_from_network("eip155:84532").unwrap(), 84532);
        assert_eq!(chain_id_from_network("eip155:8453").unwrap(), 8453);
        assert!(chain_id_from_network("solana:mainnet").is_err());
        assert!(chain_id_from_network("eip155:").is_err());
    }

    #[test]
    fn type_string_matches_wire_contract() {
        assert_eq!(
            Payment::eip712_encode_type(),
            "Payment(address payer,address payTo,uint256 amount,address asset,uint256 timestamp)"
        );
    }

    #[test]
    fn signing_hash_depends_on_domain() {
        let payment = Payment {
            payer: Address::ZERO,
            payTo: Address::ZERO,
            amount: U256::from(1000u64),
            asset: Address::ZERO,
            timestamp: U256::from(1u64),
        };
        assert_ne!(
            payment.signing_hash(84532, Address::ZERO),
            payment.signing_hash(8453, Address::ZERO)
        );
    }
}
