//! Crypto error types.

/// Errors from credential sealing operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Sealing failed: {0}")]
    SealFailed(String),

    #[error("Unsealing failed: {0}")]
    UnsealFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Malformed sealed blob: {0}")]
    MalformedBlob(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
