//! x402 payment authorization
//!
//! - [`proof`]: wire format of a payment proof and its EIP-712 typed data
//! - [`verifier`]: pure checks of a proof against the expected payment
//! - [`gate`]: per-operation pricing and the 402 challenge
//! - [`signer`]: payer-side signing, used by the CLI and tests

pub mod gate;
pub mod proof;
pub mod signer;
pub mod verifier;

pub use gate::{GateDecision, PaymentChallenge, PaymentConfig, PaymentGate, PAYMENT_HEADER};
pub use proof::{ExpectedPayment, PaymentProof, FRESHNESS_WINDOW_SECS, X402_VERSION};
pub use signer::PaymentSigner;
pub use verifier::{PaymentVerifier, Rejection};

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("payment header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payment proof is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported network id {0:?}, expected eip155:<chainId>")]
    InvalidNetwork(String),
}
