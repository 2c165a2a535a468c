// error definitions
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Errors related to the counting stores
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors, including invalid policies
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Connection errors talking to the distributed store
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command errors reported by the distributed store
    #[error("Command error: {0}")]
    Command(String),

    /// Reply/data conversion errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bounded operation deadline expired
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

// Map redis errors onto the storage taxonomy
impl From<redis::RedisError> for AdmissionError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed
            | redis::ErrorKind::IoError
            | redis::ErrorKind::ClientError => {
                AdmissionError::Storage(StorageError::Connection(err.to_string()))
            }
            redis::ErrorKind::TypeError => {
                AdmissionError::Storage(StorageError::Serialization(err.to_string()))
            }
            _ => AdmissionError::Storage(StorageError::Command(err.to_string())),
        }
    }
}

// JSON config parsing failures are configuration errors
impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::Config(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, AdmissionError>;
