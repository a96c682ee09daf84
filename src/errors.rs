//! Error types for the stakeplay settlement core
//!
//! Infrastructure failures (`StakeError`) are kept apart from the
//! caller-facing session taxonomy (`SessionError`) so that "lost the race"
//! and "failed" never collapse into the same thing.

use crate::games::types::{SessionId, SessionStatus};
use std::error::Error as StdError;
use std::fmt;

/// Root error type for infrastructure operations
#[derive(Debug)]
pub enum StakeError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Session store errors
    Storage(StorageError),

    /// Balance ledger errors
    Ledger(LedgerError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Session store errors
#[derive(Debug)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
    InvalidTransition { from: SessionStatus, to: SessionStatus },
}

/// Balance ledger errors
#[derive(Debug)]
pub enum LedgerError {
    InsufficientFunds { owner: String, balance: u64, requested: u64 },
    Overflow { owner: String },
    Unavailable(String),
}

impl fmt::Display for StakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakeError::Configuration(e) => write!(f, "Configuration error: {}", e),
            StakeError::Storage(e) => write!(f, "Storage error: {}", e),
            StakeError::Ledger(e) => write!(f, "Ledger error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
            StorageError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {} -> {}", from, to)
            }
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InsufficientFunds { owner, balance, requested } => write!(
                f,
                "Insufficient funds for {}: balance {}, requested {}",
                owner, balance, requested
            ),
            LedgerError::Overflow { owner } => write!(f, "Balance overflow for {}", owner),
            LedgerError::Unavailable(msg) => write!(f, "Ledger unavailable: {}", msg),
        }
    }
}

impl StdError for StakeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StakeError::Configuration(e) => Some(e),
            StakeError::Storage(e) => Some(e),
            StakeError::Ledger(e) => Some(e),
        }
    }
}

impl StdError for ConfigurationError {}
impl StdError for StorageError {}
impl StdError for LedgerError {}

impl From<ConfigurationError> for StakeError {
    fn from(e: ConfigurationError) -> Self {
        StakeError::Configuration(e)
    }
}

impl From<StorageError> for StakeError {
    fn from(e: StorageError) -> Self {
        StakeError::Storage(e)
    }
}

impl From<LedgerError> for StakeError {
    fn from(e: LedgerError) -> Self {
        StakeError::Ledger(e)
    }
}

// External error conversions
impl From<rocksdb::Error> for StakeError {
    fn from(e: rocksdb::Error) -> Self {
        StakeError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for StakeError {
    fn from(e: std::io::Error) -> Self {
        StakeError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for StakeError {
    fn from(e: serde_json::Error) -> Self {
        StakeError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

pub type StakeResult<T> = Result<T, StakeError>;

/// Errors reported to callers of the session API
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Rejected before anything was persisted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session {0} not found")]
    NotFound(SessionId),

    /// Mutation attempted on a session that is no longer open
    #[error("Session {id} is {status}")]
    Conflict { id: SessionId, status: SessionStatus },

    /// The session store or the ledger failed; the session keeps its last durable state
    #[error("Settlement failed: {0}")]
    Settlement(#[from] StakeError),

    /// The terminal transition was applied but the credit after it failed.
    /// A retry only sees the terminal status, so this needs reconciliation.
    #[error("Session {id} is {status} but its credit failed: {source}")]
    CreditFailed {
        id: SessionId,
        status: SessionStatus,
        #[source]
        source: StakeError,
    },
}

impl SessionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SessionError::InvalidArgument(msg.into())
    }

    /// Whether a caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Settlement(StakeError::Ledger(LedgerError::InsufficientFunds { .. })) => false,
            SessionError::Settlement(_) => true,
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StakeError::Configuration(ConfigurationError::ValidationFailed("test".to_string()));

        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("test"));
    }

    #[test]
    fn test_insufficient_funds_details() {
        let error = LedgerError::InsufficientFunds {
            owner: "alice".to_string(),
            balance: 5,
            requested: 30,
        };

        assert!(error.to_string().contains("balance 5"));
        assert!(error.to_string().contains("requested 30"));
    }

    #[test]
    fn test_error_source() {
        let error: StakeError = StorageError::ReadFailed("disk".to_string()).into();
        assert!(error.source().is_some());
    }

    #[test]
    fn test_session_error_retryable() {
        let conflict = SessionError::Conflict {
            id: SessionId(7),
            status: SessionStatus::Finished,
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.to_string().contains("finished"));

        let failed: SessionError = StakeError::from(LedgerError::Unavailable("down".to_string())).into();
        assert!(failed.is_retryable());

        let unpaid = SessionError::CreditFailed {
            id: SessionId(8),
            status: SessionStatus::Finished,
            source: LedgerError::Unavailable("down".to_string()).into(),
        };
        assert!(!unpaid.is_retryable());
        assert!(unpaid.source().is_some());
    }
}
