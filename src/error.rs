use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Broad category of an [`UnsealError`]
///
/// Callers that only need to decide between "fix the input", "the cluster is broken" and
/// "wrong shares" can match on this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out-of-range parameters or malformed encodings
    Validation,
    /// Randomness or cipher failures
    Crypto,
    /// The reconstructed key does not open the verification record
    VerificationMismatch,
    /// The transactional store failed
    Storage,
    /// A key-protected operation was called while still locked
    NotInitialized,
}

/// Error type for secret sharing, storage and unlock operations
#[derive(Error, Debug)]
pub enum UnsealError {
    /// Secret key length outside 1..=32 bytes
    #[error("Invalid secret length {0}, must be between 1 and 32 bytes")]
    InvalidSecretLength(usize),

    /// Threshold outside 2..=127
    #[error("Invalid threshold {0}, must be between 2 and 127")]
    InvalidThreshold(u8),

    /// Share count outside threshold..=127
    #[error("Invalid share count {total_shares}, must be between threshold {threshold} and 127")]
    InvalidShareCount { total_shares: u8, threshold: u8 },

    /// Not enough shares handed to combine
    #[error("Need at least {needed} shares, got {got}")]
    InsufficientShares { needed: usize, got: usize },

    /// Two shares carry the same x-coordinate
    #[error("Duplicate share index {0}")]
    DuplicateShareIndex(u8),

    /// Share blob or share text could not be decoded
    #[error("Malformed share: {0}")]
    MalformedShare(String),

    /// Interpolated integer is not a valid secret encoding
    #[error("Malformed secret encoding: {0}")]
    MalformedSecret(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operating system random source failed
    #[error("Random source failure: {0}")]
    RandomSource(String),

    #[error("Invalid cipher key length {0}, expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),

    #[error("Invalid block length {got}, expected exactly {expected} bytes")]
    InvalidBlockLength { expected: usize, got: usize },

    #[error("Master key cannot decrypt the verification record")]
    VerificationMismatch,

    #[error("Master key is not initialized")]
    NotInitialized,

    /// General I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Store file is not a database or failed its integrity check
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// SQLite error (busy beyond the timeout, I/O, constraint)
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<rusqlite::Error> for UnsealError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => {
                Self::CorruptStore(err.to_string())
            }
            _ => Self::Sqlite(err),
        }
    }
}

impl UnsealError {
    /// Returns the category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSecretLength(_)
            | Self::InvalidThreshold(_)
            | Self::InvalidShareCount { .. }
            | Self::InsufficientShares { .. }
            | Self::DuplicateShareIndex(_)
            | Self::MalformedShare(_)
            | Self::MalformedSecret(_)
            | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::RandomSource(_) | Self::InvalidKeyLength(_) | Self::InvalidBlockLength { .. } => {
                ErrorKind::Crypto
            }
            Self::VerificationMismatch => ErrorKind::VerificationMismatch,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::IoError(_)
            | Self::BucketNotFound(_)
            | Self::CorruptStore(_)
            | Self::Sqlite(_)
            | Self::StorageError(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, UnsealError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(UnsealError::InvalidThreshold(1).kind(), ErrorKind::Validation);
        assert_eq!(UnsealError::DuplicateShareIndex(3).kind(), ErrorKind::Validation);
        assert_eq!(UnsealError::InvalidKeyLength(7).kind(), ErrorKind::Crypto);
        assert_eq!(
            UnsealError::VerificationMismatch.kind(),
            ErrorKind::VerificationMismatch
        );
        assert_eq!(UnsealError::NotInitialized.kind(), ErrorKind::NotInitialized);
        assert_eq!(
            UnsealError::from(io::Error::other("disk gone")).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            UnsealError::from(rusqlite::Error::QueryReturnedNoRows).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_messages_name_the_bound() {
        let err = UnsealError::InvalidShareCount {
            total_shares: 2,
            threshold: 3,
        };
        assert!(err.to_string().contains("threshold 3"));
        assert!(UnsealError::InvalidSecretLength(33).to_string().contains("32"));
    }
}
