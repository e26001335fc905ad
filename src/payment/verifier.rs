//! Payment proof verification
//!
//! Checks run cheapest first and stop at the first failure. The reason is logged at
//! debug level for operators; callers only learn pass or fail.

use super::proof::{chain_id_from_network, ExpectedPayment, Payment, PaymentProof};
use super::proof::{FRESHNESS_WINDOW_SECS, X402_VERSION};
use alloy::primitives::{Address, Signature, U256};
use std::str::FromStr;

/// Why a proof was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unsupported x402 version {0}")]
    Version(u32),
    #[error("payTo {0} does not match the configured recipient")]
    PayTo(String),
    #[error("asset {0} does not match the accepted asset")]
    Asset(String),
    #[error("network {0} does not match the accepted network")]
    Network(String),
    #[error("amount {0} does not equal the price of this operation")]
    Amount(String),
    #[error("signature invalid: {0}")]
    Signature(String),
    #[error("proof is {age}s old, older than the freshness window")]
    Expired { age: i64 },
}

impl Rejection {
    /// Short check name for structured logs
    pub fn check(&self) -> &'static str {
        match self {
            Rejection::Version(_) => "version",
            Rejection::PayTo(_) => "pay_to",
            Rejection::Asset(_) => "asset",
            Rejection::Network(_) => "network",
            Rejection::Amount(_) => "amount",
            Rejection::Signature(_) => "signature",
            Rejection::Expired { .. } => "freshness",
        }
    }
}

/// Stateless verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentVerifier;

impl PaymentVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, proof: &PaymentProof, expected: &ExpectedPayment) -> bool {
        self.verify_at(proof, expected, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock (unix seconds)
    pub fn verify_at(&self, proof: &PaymentProof, expected: &ExpectedPayment, now: i64) -> bool {
        match self.explain_at(proof, expected, now) {
            Ok(()) => {
                tracing::info!(
                    payer = %proof.payer,
                    amount = %proof.amount,
                    network = %proof.network,
                    "Payment verified"
                );
                true
            }
            Err(rejection) => {
                tracing::debug!(
                    check = rejection.check(),
                    reason = %rejection,
                    payer = %proof.payer,
                    "Payment proof rejected"
                );
                false
            }
        }
    }

    /// Run every check and return the first failure
    pub fn explain_at(
        &self,
        proof: &PaymentProof,
        expected: &ExpectedPayment,
        now: i64,
    ) -> Result<(), Rejection> {
        if proof.x402_version != X402_VERSION {
            return Err(Rejection::Version(proof.x402_version));
        }
        if !proof
            .pay_to
            .eq_ignore_ascii_case(&expected.pay_to.to_string())
        {
            return Err(Rejection::PayTo(proof.pay_to.clone()));
        }
        if !proof.asset.eq_ignore_ascii_case(&expected.asset.to_string()) {
            return Err(Rejection::Asset(proof.asset.clone()));
        }
        if proof.network != expected.network {
            return Err(Rejection::Network(proof.network.clone()));
        }

        let amount = parse_amount(&proof.amount)
            .filter(|amount| *amount == expected.amount)
            .ok_or_else(|| Rejection::Amount(proof.amount.clone()))?;

        self.check_signature(proof, expected, amount)?;

        let timestamp = i64::try_from(proof.timestamp).unwrap_or(i64::MAX);
        let age = now.saturating_sub(timestamp);
        if age > FRESHNESS_WINDOW_SECS {
            return Err(Rejection::Expired { age });
        }

        Ok(())
    }

    fn check_signature(
        &self,
        proof: &PaymentProof,
        expected: &ExpectedPayment,
        amount: U256,
    ) -> Result<(), Rejection> {
        let payer = parse_address("payer", &proof.payer)?;
        let pay_to = parse_address("payTo", &proof.pay_to)?;
        let asset = parse_address("asset", &proof.asset)?;
        let chain_id = chain_id_from_network(&expected.network)
            .map_err(|e| Rejection::Signature(e.to_string()))?;

        let signature = Signature::from_str(&proof.signature)
            .map_err(|e| Rejection::Signature(format!("malformed signature: {}", e)))?;

        let message = Payment {
            payer,
            payTo: pay_to,
            amount,
            asset,
            timestamp: U256::from(proof.timestamp),
        };
        let hash = message.signing_hash(chain_id, expected.asset);

        let recovered = signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| Rejection::Signature(format!("recovery failed: {}", e)))?;

        if recovered != payer {
            return Err(Rejection::Signature(format!(
                "recovered {} but proof names {}",
                recovered, payer
            )));
        }
        Ok(())
    }
}

fn parse_amount(raw: &str) -> Option<U256> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(raw, 10).ok()
}

fn parse_address(field: &str, raw: &str) -> Result<Address, Rejection> {
    Address::from_str(raw)
        .map_err(|e| Rejection::Signature(format!("invalid {} address {}: {}", field, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::signer::PaymentSigner;
    use crate::tokens::addresses::USDC_BASE_SEPOLIA;
    use alloy::primitives::address;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const PAY_TO: Address = address!("00000000000000000000000000000000000000aa");
    const NOW: i64 = 1_700_000_000;

    fn expected(amount: u64) -> ExpectedPayment {
        ExpectedPayment {
            pay_to: PAY_TO,
            asset: USDC_BASE_SEPOLIA,
            network: "eip155:84532".to_string(),
            amount: U256::from(amount),
        }
    }

    fn signed(amount: u64, timestamp: i64) -> PaymentProof {
        PaymentSigner::from_hex(TEST_KEY)
            .unwrap()
            .sign_proof(
                PAY_TO,
                USDC_BASE_SEPOLIA,
                U256::from(amount),
                "eip155:84532",
                timestamp as u64,
            )
            .unwrap()
    }

    #[test]
    fn accepts_well_formed_proof() {
        let proof = signed(1000, NOW - 5);
        assert_eq!(
            PaymentVerifier::new().explain_at(&proof, &expected(1000), NOW),
            Ok(())
        );
        assert!(PaymentVerifier::new().verify_at(&proof, &expected(1000), NOW));
    }

    #[test]
    fn verification_is_repeatable() {
        let proof = signed(1000, NOW);
        let verifier = PaymentVerifier::new();
        let first = verifier.verify_at(&proof, &expected(1000), NOW);
        let second = verifier.verify_at(&proof, &expected(1000), NOW);
        assert!(first && second);
    }

    #[test]
    fn amount_must_match_exactly() {
        let underpaid = signed(999, NOW);
        assert_eq!(
            PaymentVerifier::new().explain_at(&underpaid, &expected(1000), NOW),
            Err(Rejection::Amount("999".to_string()))
        );

        let overpaid = signed(1001, NOW);
        assert!(!PaymentVerifier::new().verify_at(&overpaid, &expected(1000), NOW));
    }

    #[test]
    fn recipient_and_asset_compare_case_insensitively() {
        let mut proof = signed(1000, NOW);
        proof.pay_to = proof.pay_to.to_uppercase().replacen("0X", "0x", 1);
        proof.asset = proof.asset.to_lowercase();
        assert!(PaymentVerifier::new().verify_at(&proof, &expected(1000), NOW));
    }

    #[test]
    fn each_field_perturbation_is_rejected() {
        let verifier = PaymentVerifier::new();
        let good = signed(1000, NOW);

        let mut p = good.clone();
        p.x402_version = 1;
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "version");

        let mut p = good.clone();
        p.pay_to = "0x00000000000000000000000000000000000000bb".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "pay_to");

        let mut p = good.clone();
        p.asset = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "asset");

        let mut p = good.clone();
        p.network = "eip155:8453".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "network");

        let mut p = good.clone();
        p.amount = "1000.0".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "amount");

        // signature covers the timestamp
        let mut p = good.clone();
        p.timestamp += 1;
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "signature");

        let mut p = good.clone();
        p.payer = "0x00000000000000000000000000000000000000cc".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "signature");

        let mut p = good;
        p.signature = "0xdeadbeef".to_string();
        assert_eq!(verifier.explain_at(&p, &expected(1000), NOW).unwrap_err().check(), "signature");
    }

    #[test]
    fn signature_by_someone_else_is_rejected() {
        let mut proof = signed(1000, NOW);
        let other = PaymentSigner::from_hex(OTHER_KEY)
            .unwrap()
            .sign_proof(PAY_TO, USDC_BASE_SEPOLIA, U256::from(1000u64), "eip155:84532", NOW as u64)
            .unwrap();
        proof.signature = other.signature;
        assert!(matches!(
            PaymentVerifier::new().explain_at(&proof, &expected(1000), NOW),
            Err(Rejection::Signature(_))
        ));
    }

    #[test]
    fn freshness_window() {
        let verifier = PaymentVerifier::new();
        assert!(verifier.verify_at(&signed(1000, NOW - 600), &expected(1000), NOW));
        assert_eq!(
            verifier.explain_at(&signed(1000, NOW - 601), &expected(1000), NOW),
            Err(Rejection::Expired { age: 601 })
        );
        // future timestamps pass the age check
        assert!(verifier.verify_at(&signed(1000, NOW + 3600), &expected(1000), NOW));
    }
}
