//! Error types for the settlement crate.
//!
//! Every failure the orchestrator can observe is folded into [`SettlementError`]. The
//! orchestrator persists the `Display` form of the error on the payment record when a
//! payment transitions to `failed`.

use crate::types::PaymentStatus;
use thiserror::Error;

/// Main error type for settlement operations.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during Base64 decoding
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Error reading or writing the payment store
    #[error("Storage error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Error during blockchain operations (RPC, broadcast, confirmation)
    #[error("Blockchain error: {0}")]
    BlockchainError(String),

    /// A required secret or endpoint is not configured
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input rejected before any state was touched
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The bridge domain has no known chain
    #[error("Unsupported CCTP domain: {0}")]
    UnsupportedDomain(u32),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Key encryption or decryption failed
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// The attestation authority returned something unusable
    #[error("Attestation error: {0}")]
    AttestationError(String),

    /// Attestation polling budget exhausted
    #[error("Timed out waiting for Circle attestation after {attempts} attempts")]
    AttestationTimeout {
        /// Number of polls performed
        attempts: u32,
    },

    /// The forwarding relayer rejected the attested message
    #[error("Forwarder failed: {0}")]
    ForwarderError(String),

    /// The pool deposit could not be built, signed or confirmed
    #[error("Pool deposit failed: {0}")]
    PoolDepositError(String),

    /// No payment with this id
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// A conditional update lost against a concurrent writer
    #[error("Status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        /// Status the caller read
        expected: PaymentStatus,
        /// Status currently stored
        actual: PaymentStatus,
    },

    /// `sourceTxHash` is already set to a different value
    #[error("Source transaction hash is already set to {0}")]
    SourceTxHashImmutable(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for settlement operations.
pub type Result<T> = std::result::Result<T, SettlementError>;

impl From<ethers::providers::ProviderError> for SettlementError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        SettlementError::BlockchainError(err.to_string())
    }
}

impl From<ethers::signers::WalletError> for SettlementError {
    fn from(err: ethers::signers::WalletError) -> Self {
        SettlementError::CryptoError(err.to_string())
    }
}

impl From<ethers::utils::ConversionError> for SettlementError {
    fn from(err: ethers::utils::ConversionError) -> Self {
        SettlementError::InvalidAmount(err.to_string())
    }
}

impl SettlementError {
    /// Returns true when the error means another invocation owns the step.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SettlementError::StatusConflict { .. })
    }
}
