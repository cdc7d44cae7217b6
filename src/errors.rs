//! Error types for the coinflip system
//!
//! One enum per concern, folded into [`CoinflipError`] so binaries can use `?`
//! across the contract, the preview feed and the configuration layer.

use crate::games::types::{Address, Amount, RequestId};
use thiserror::Error;

/// Root error type for all coinflip operations
#[derive(Debug, Error)]
pub enum CoinflipError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Preview error: {0}")]
    Preview(#[from] PreviewError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Request-time and oracle-side errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Insufficient fee: paid {paid}, oracle minimum is {minimum}")]
    InsufficientFee { paid: Amount, minimum: Amount },

    #[error("Wager {wager} is below the minimum stake {minimum}")]
    BelowMinimumWager { wager: Amount, minimum: Amount },

    #[error("Insufficient funds for {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("Oracle has no open request {0}")]
    UnknownOracleRequest(RequestId),

    #[error("Request id {0} was issued twice")]
    DuplicateRequestId(RequestId),

    #[error("Client deposit of {client} too low: requested {requested}, available {available}")]
    InsufficientDeposit {
        client: Address,
        requested: Amount,
        available: Amount,
    },

    #[error("Caller {0} is not the owner")]
    NotOwner(Address),
}

/// Callback and settlement errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("Callback from unauthorized sender {0}")]
    UnauthorizedCallback(Address),

    #[error("Unknown request {0}")]
    UnknownRequest(RequestId),

    #[error("Request {0} already settled")]
    AlreadySettled(RequestId),

    #[error("House pool cannot cover payout: needed {needed}, available {available}")]
    InsufficientHouseLiquidity { needed: Amount, available: Amount },

    #[error("Refund of {amount} for game {refunded_game} exceeds refundable balance {available}")]
    InsufficientRefundableBalance {
        refunded_game: RequestId,
        amount: Amount,
        available: Amount,
    },

    #[error("Oracle rejected settlement: {0}")]
    Oracle(#[from] OracleError),
}

/// Preview feed errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    #[error("Randomizer sequencer: chain id {0} not supported")]
    UnsupportedChain(u64),

    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Preview connection lost")]
    ConnectionLost,

    #[error("Timed out waiting for preview of request {0}")]
    Timeout(RequestId),

    #[error("Malformed preview frame: {0}")]
    Protocol(String),
}

/// Ledger snapshot errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::ReadFailed(e.to_string())
    }
}

impl From<toml::de::Error> for CoinflipError {
    fn from(e: toml::de::Error) -> Self {
        CoinflipError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

// Convenience type aliases for Results
pub type CoinflipResult<T> = Result<T, CoinflipError>;
pub type OracleResult<T> = Result<T, OracleError>;
pub type SettlementResult<T> = Result<T, SettlementError>;
pub type PreviewResult<T> = Result<T, PreviewError>;
