//! BluePilot payment gate
//!
//! Metered HTTP endpoints for a trading agent, guarded by two independent checks:
//! - an x402 payment gate that requires a signed, fresh stablecoin payment proof for
//!   the exact price of each priced operation
//! - a compliance engine that evaluates every trade intent against the user's
//!   configured limits before anything executable is returned
//!
//! Upstream contract reads run under a bounded retry driver, and every failure is
//! classified and rendered as a structured error envelope.
//!
//! # Security Model
//!
//! - Payment proofs are verified, never stored. There is no spent-proof ledger, so a
//!   proof can be replayed within its freshness window.
//! - Without payment configuration the gate is disabled and all traffic is served.
//! - Trades are returned as unsigned calldata; this service never holds user keys.

pub mod config;
pub mod envelope;
pub mod http;
pub mod payment;
pub mod policy;
pub mod retry;
pub mod tokens;
pub mod upstream;

mod error;

// Re-export commonly used types
pub use config::{Config, RpcConfig};
pub use envelope::{ApiError, ErrorCode};
pub use error::{Error, Result};
pub use payment::{PaymentGate, PaymentProof, PaymentSigner, PaymentVerifier};
pub use policy::{ComplianceEngine, PolicyVerdict, TradeIntent, UserPolicy};
pub use retry::{Retrier, RetryPolicy};
