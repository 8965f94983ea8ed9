//! Error types for partwise

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartwiseError {
    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid part size {part_size}: must be at least {min} bytes")]
    InvalidPartSize { part_size: u64, min: u64 },

    #[error("Object too large: {size} bytes exceeds the maximum of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Upload not found: {upload_id}")]
    UploadNotFound { upload_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PartwiseError {
    /// Whether the error was raised by input validation, before any I/O
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PartwiseError::InvalidBucketName(_)
                | PartwiseError::InvalidKey(_)
                | PartwiseError::InvalidSize(_)
                | PartwiseError::InvalidPartSize { .. }
                | PartwiseError::ObjectTooLarge { .. }
        )
    }
}
