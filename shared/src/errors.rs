//! Error types for the LikedSongs access layer

use thiserror::Error;

use crate::codec::AttributeKind;

/// Result type alias using the access layer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Service error codes the store reports for conditions that may clear on retry
const TRANSIENT_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
    "TransactionInProgressException",
    "TransportError",
];

/// Cancellation reasons that make a cancelled transaction worth resubmitting
const TRANSIENT_REASONS: &[&str] = &["TransactionConflict", "ThrottlingError", "ProvisionedThroughputExceeded"];

const CONDITION_FAILED_CODE: &str = "ConditionalCheckFailedException";
const TRANSACTION_CANCELED_CODE: &str = "TransactionCanceledException";
const CONDITION_FAILED_REASON: &str = "ConditionalCheckFailed";

/// Whether a store error may succeed if the same request is sent again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Transient,
    Permanent,
}

/// An error reported by the store (or the transport in front of it)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Service error code, e.g. `ValidationException`
    pub code: String,
    /// Human readable message from the service
    pub message: String,
    pub kind: StoreErrorKind,
    /// Per-entry reason codes of a cancelled transaction; `None` for entries that were fine
    pub cancellation_reasons: Vec<Option<String>>,
}

impl StoreError {
    /// Build a service error, classifying it by code
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let kind = if TRANSIENT_CODES.contains(&code.as_str()) {
            StoreErrorKind::Transient
        } else {
            StoreErrorKind::Permanent
        };
        Self {
            code,
            message: message.into(),
            kind,
            cancellation_reasons: Vec::new(),
        }
    }

    /// A request that never got a service answer (timeout, connection reset, ...)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("TransportError", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("ValidationException", message)
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::new(
            "ResourceNotFoundException",
            format!("Requested resource not found: Table: {} not found", table),
        )
    }

    pub fn condition_failed() -> Self {
        Self::new(CONDITION_FAILED_CODE, "The conditional request failed")
    }

    /// A cancelled transaction, carrying one reason slot per submitted entry
    pub fn transaction_canceled(reasons: Vec<Option<String>>) -> Self {
        let summary = reasons
            .iter()
            .map(|r| r.as_deref().unwrap_or("None"))
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            TRANSACTION_CANCELED_CODE,
            format!("Transaction cancelled, please refer cancellation reasons for specific reasons [{}]", summary),
        )
        .with_cancellation_reasons(reasons)
    }

    pub fn with_cancellation_reasons(mut self, reasons: Vec<Option<String>>) -> Self {
        if reasons
            .iter()
            .flatten()
            .any(|r| TRANSIENT_REASONS.contains(&r.as_str()))
        {
            self.kind = StoreErrorKind::Transient;
        }
        self.cancellation_reasons = reasons;
        self
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }

    /// True when a write precondition (single item or inside a transaction) did not hold
    pub fn is_condition_failure(&self) -> bool {
        self.code == CONDITION_FAILED_CODE
            || (self.code == TRANSACTION_CANCELED_CODE
                && self
                    .cancellation_reasons
                    .iter()
                    .flatten()
                    .any(|r| r == CONDITION_FAILED_REASON))
    }
}

/// Failure to turn a stored item back into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` has type {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: AttributeKind,
        found: AttributeKind,
    },

    /// The attribute tags matched but the value could not be converted
    #[error("malformed item: {0}")]
    Malformed(String),
}

/// What stopped an operation before the store answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Signal,
    Deadline,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Signal => f.write_str("cancellation signal"),
            CancelCause::Deadline => f.write_str("deadline exceeded"),
        }
    }
}

/// Access layer error types
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or malformed primary key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Malformed request caught before submission
    #[error("Validation error: {0}")]
    Validation(String),

    /// Two transaction entries address the same item
    #[error("Conflicting keys in transaction: ({partition}, {sort}) appears more than once")]
    ConflictingKeys { partition: String, sort: String },

    /// Transaction entry count outside 1..=max
    #[error("Transaction must contain between 1 and {max} entries, got {len}")]
    BatchSize { len: usize, max: usize },

    /// A write precondition did not hold; nothing was written
    #[error("Condition failed: {message}")]
    ConditionFailure {
        message: String,
        reasons: Vec<Option<String>>,
    },

    /// Store or transport error
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Stored item could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Record could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Invalid pagination cursor
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation abandoned before the store answered; a write may or may not have landed
    #[error("Operation cancelled: {0}")]
    Cancelled(CancelCause),

    /// Bad configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        if err.is_condition_failure() {
            Error::ConditionFailure {
                message: err.message,
                reasons: err.cancellation_reasons,
            }
        } else {
            Error::Store(err)
        }
    }
}

impl Error {
    /// Returns a stable machine readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidKey(_) => "invalid_key",
            Error::Validation(_) => "validation_error",
            Error::ConflictingKeys { .. } => "conflicting_keys",
            Error::BatchSize { .. } => "batch_size",
            Error::ConditionFailure { .. } => "condition_failure",
            Error::Store(_) => "store_error",
            Error::Decode(_) => "decode_error",
            Error::Encode(_) => "encode_error",
            Error::InvalidCursor(_) => "invalid_cursor",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled(_) => "cancelled",
            Error::Config(_) => "config_error",
        }
    }

    /// True for errors raised locally before anything was sent to the store
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(_)
                | Error::Validation(_)
                | Error::ConflictingKeys { .. }
                | Error::BatchSize { .. }
                | Error::Encode(_)
                | Error::InvalidCursor(_)
                | Error::Config(_)
        )
    }

    /// Whether resubmitting the same request could succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retriable(),
            _ => false,
        }
    }
}
