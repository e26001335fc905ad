//! Upstream failure taxonomy
//!
//! Every failure coming back from an external dependency (RPC node, contract call)
//! is captured as an [`UpstreamFailure`] and classified into a stable [`ErrorKind`].
//! The kind drives two decisions:
//! - whether the retry driver may try again ([`FailureClass::Transient`])
//! - which error code the HTTP layer reports (see [`crate::envelope`])

pub mod vault;

pub use vault::{TradingBackend, VaultRouterClient};

use serde::Serialize;

/// Stable classification of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    InsufficientBalance,
    /// Gas estimation infeasible: the transaction would revert
    SimulationFailed,
    /// Execution reverted for another reason
    ContractError,
    /// Timeout, connection reset, DNS failure
    NetworkError,
    UpstreamError,
}

/// Propagation class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Missing or invalid payment proof; answered with a fresh challenge
    InvalidProof,
    /// Trade rejected by the compliance engine; never retried
    PolicyViolation,
    /// Rate limiting or network trouble; retried up to the budget
    Transient,
    /// Surfaced immediately
    Permanent,
}

impl ErrorKind {
    pub fn class(&self) -> FailureClass {
        match self {
            ErrorKind::RateLimited | ErrorKind::NetworkError => FailureClass::Transient,
            ErrorKind::InsufficientBalance
            | ErrorKind::SimulationFailed
            | ErrorKind::ContractError
            | ErrorKind::UpstreamError => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

/// Raw failure reported by an upstream dependency
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamFailure {
    /// HTTP-equivalent status code, when the transport exposed one
    pub status: Option<u16>,
    /// Low-level error code (e.g. `ECONNRESET`)
    pub code: Option<String>,
    pub message: String,
    /// Seconds from a `Retry-After` header
    pub retry_after: Option<u64>,
}

impl UpstreamFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }

    /// Build from an alloy contract call error, keeping the HTTP status when the
    /// transport reported one.
    pub fn from_contract_error(err: &alloy::contract::Error) -> Self {
        use alloy::transports::{RpcError, TransportErrorKind};

        let mut failure = Self::new(err.to_string());
        if let alloy::contract::Error::TransportError(RpcError::Transport(
            TransportErrorKind::HttpError(http),
        )) = err
        {
            failure.status = Some(http.status);
        }
        failure
    }
}

/// Anything the retry driver can inspect
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    /// HTTP-equivalent status, if known
    fn status(&self) -> Option<u16> {
        None
    }
}

impl Classify for UpstreamFailure {
    fn kind(&self) -> ErrorKind {
        classify(self)
    }

    fn status(&self) -> Option<u16> {
        self.status
    }
}

type Rule = (fn(&UpstreamFailure, &str) -> bool, ErrorKind);

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "dns",
    "econnreset",
    "etimedout",
    "enotfound",
];

fn rate_limit_status(failure: &UpstreamFailure, _: &str) -> bool {
    failure.status == Some(429)
}

fn rate_limit_text(_: &UpstreamFailure, msg: &str) -> bool {
    msg.contains("rate limit") || msg.contains("too many requests")
}

fn insufficient_balance(_: &UpstreamFailure, msg: &str) -> bool {
    msg.contains("insufficient funds") || msg.contains("insufficient balance")
}

fn gas_estimation(_: &UpstreamFailure, msg: &str) -> bool {
    msg.contains("gas") && msg.contains("estimat")
}

fn reverted(_: &UpstreamFailure, msg: &str) -> bool {
    msg.contains("revert") || msg.contains("execution failed")
}

fn network(failure: &UpstreamFailure, msg: &str) -> bool {
    let code = failure
        .code
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    NETWORK_MARKERS
        .iter()
        .any(|marker| msg.contains(marker) || code == *marker)
}

/// Evaluated top to bottom; first match wins.
const RULES: &[Rule] = &[
    (rate_limit_status, ErrorKind::RateLimited),
    (rate_limit_text, ErrorKind::RateLimited),
    (insufficient_balance, ErrorKind::InsufficientBalance),
    (gas_estimation, ErrorKind::SimulationFailed),
    (reverted, ErrorKind::ContractError),
    (network, ErrorKind::NetworkError),
];

/// Classify a raw upstream failure
pub fn classify(failure: &UpstreamFailure) -> ErrorKind {
    let message = failure.message.to_lowercase();
    RULES
        .iter()
        .find(|(matches, _)| matches(failure, &message))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::UpstreamError)
}
