//! Payer-side proof signer
//!
//! SECURITY: the private key lives only inside alloy's `PrivateKeySigner`.
//! - Never serialized (no `Serialize` impl)
//! - Never logged (`Debug` is redacted)
//! - Read from the environment as a `SecretString`

use super::proof::{chain_id_from_network, Payment, PaymentProof, X402_VERSION};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use secrecy::{ExposeSecret, SecretString};

/// Signs x402 payment proofs with a local key
pub struct PaymentSigner {
    signer: PrivateKeySigner,
    address: Address,
}

impl PaymentSigner {
    /// Load from an environment variable holding a hex private key
    pub fn from_env(var_name: &str) -> Result<Self> {
        let key = std::env::var(var_name).map_err(|_| {
            Error::Wallet(format!(
                "Environment variable {} not set. Required for signing payments.",
                var_name
            ))
        })?;
        Self::from_secret(&SecretString::from(key))
    }

    pub fn from_secret(key: &SecretString) -> Result<Self> {
        Self::from_hex(key.expose_secret())
    }

    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| Error::Wallet(format!("Invalid private key: {}", e)))?;
        let address = signer.address();

        Ok(Self { signer, address })
    }

    /// Payer address (safe to share)
    pub fn address(&self) -> Address {
        self.address
    }

    /// Build and sign a proof for an exact smallest-unit amount
    pub fn sign_proof(
        &self,
        pay_to: Address,
        asset: Address,
        amount: U256,
        network: &str,
        timestamp: u64,
    ) -> Result<PaymentProof> {
        let chain_id = chain_id_from_network(network)?;

        let message = Payment {
            payer: self.address,
            payTo: pay_to,
            amount,
            asset,
            timestamp: U256::from(timestamp),
        };
        let hash = message.signing_hash(chain_id, asset);

        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::Wallet(format!("Signing failed: {}", e)))?;

        tracing::debug!(
            payer = %self.address,
            pay_to = %pay_to,
            amount = %amount,
            network,
            "Signed payment proof"
        );

        Ok(PaymentProof {
            x402_version: X402_VERSION,
            payer: self.address.to_string(),
            pay_to: pay_to.to_string(),
            amount: amount.to_string(),
            asset: asset.to_string(),
            network: network.to_string(),
            signature: format!("0x{}", alloy::hex::encode(signature.as_bytes())),
            timestamp,
        })
    }

    /// Sign and encode as a `PAYMENT-SIGNATURE` header value
    pub fn sign_header(
        &self,
        pay_to: Address,
        asset: Address,
        amount: U256,
        network: &str,
        timestamp: u64,
    ) -> Result<String> {
        let proof = self.sign_proof(pay_to, asset, amount, network, timestamp)?;
        Ok(proof.encode_header()?)
    }
}

impl std::fmt::Debug for PaymentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSigner")
            .field("address", &self.address)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}
