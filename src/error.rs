//! Error types for the payment gate and compliance engine

use crate::payment::ProofError;
use crate::policy::PolicyError;
use crate::retry::RetryCancelled;
use crate::upstream::{Classify, ErrorKind, UpstreamFailure};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Payment proof error: {0}")]
    Proof(#[from] ProofError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamFailure),

    #[error(transparent)]
    Cancelled(#[from] RetryCancelled),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Upstream(failure) => failure.kind(),
            _ => ErrorKind::UpstreamError,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream(failure) => failure.status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
