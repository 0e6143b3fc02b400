//! Error types for SimChain

use std::fmt;
use thiserror::Error;

/// One listener invocation that failed while a log was being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Contract address (hex) or listener name the failure came from.
    pub source: String,
    pub message: String,
}

impl ListenerFailure {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("Unknown contract: {0}")]
    UnknownContract(String),
    /// `expected` is the root the chain computed by replaying the block,
    /// `actual` the root the block was sealed with.
    #[error("State root mismatch: replay produced {expected}, block was sealed with {actual}")]
    StateRootMismatch { expected: String, actual: String },
    #[error("{} listener(s) failed: {}", .0.len(), join_failures(.0))]
    ListenerFailure(Vec<ListenerFailure>),
    #[error("Mining exhausted after {rounds} rounds without a solution")]
    MiningExhausted { rounds: u64 },
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Execution reverted: {0}")]
    ExecutionReverted(String),
    #[error("ABI error: {0}")]
    AbiError(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Ledger is in a failed state and must not be reused")]
    LedgerFailed,
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Bincode error: {0}")]
    BincodeError(String),
}

impl ChainError {
    /// Fatal errors leave the ledger unusable; everything else may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::StateRootMismatch { .. } | ChainError::LedgerFailed)
    }
}

fn join_failures(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::BincodeError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
