//! Error types for the Trust matchmaking service
//!
//! One root error with a variant per failure class. Validation and NotFound
//! are user-facing notices; everything else is a server fault.

use thiserror::Error;

/// Root error type for all Trust operations
#[derive(Debug, Error)]
pub enum TrustError {
    /// Lease could not be obtained within its retry budget
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Bad input or a rule rejection; nothing was mutated
    #[error("{0}")]
    Validation(String),

    /// No matching record for the caller
    #[error("{0}")]
    NotFound(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A stored record could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Lobby pairing errors
    #[error("Matchmaking error: {0}")]
    Match(#[from] MatchError),
}

/// Lease lock errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {name} not obtained after {attempts} attempts")]
    Timeout { name: String, attempts: u32 },

    #[error("lock backend failure: {0}")]
    Backend(#[from] StoreError),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    #[error("Invalid scan cursor: {0}")]
    InvalidCursor(String),
}

/// Record field codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{record}: missing field {field}")]
    MissingField { record: &'static str, field: &'static str },

    #[error("{record}: invalid value '{value}' for field {field}")]
    InvalidField {
        record: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{record}: unsupported schema version {version}")]
    UnsupportedVersion { record: &'static str, version: u32 },
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Lobby pairing errors
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("user {0} is already waiting in the lobby")]
    SelfPairing(i64),

    #[error("lobby slot holds an unreadable value: {0}")]
    CorruptSlot(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for TrustError {
    fn from(e: rocksdb::Error) -> Self {
        TrustError::Store(e.into())
    }
}

impl TrustError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TrustError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TrustError::NotFound(msg.into())
    }

    /// Whether this error is shown to the player as a notice rather than a fault
    pub fn is_notice(&self) -> bool {
        matches!(self, TrustError::Validation(_) | TrustError::NotFound(_))
    }
}

// Convenience type alias for Results
pub type TrustResult<T> = Result<T, TrustError>;
