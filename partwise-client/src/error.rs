//! Upload engine error types

use thiserror::Error;

use crate::abort::AbortReason;
use crate::state::{ControlAction, JobStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    /// Validation, cache and storage failures raised by the core types
    #[error(transparent)]
    Core(#[from] partwise_core::PartwiseError),

    /// A remote call failed for a reason other than abort
    #[error("Remote error: {0}")]
    Remote(#[source] partwise_core::PartwiseError),

    /// An operation observed the attempt's abort signal
    #[error("Upload aborted: {0}")]
    Aborted(AbortReason),

    /// The job was canceled by the caller
    #[error("Upload canceled{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Canceled { message: Option<String> },

    #[error("Upload failed. Expected object size {expected}, but got {actual}.")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Cannot {action} an upload that is {from}")]
    InvalidTransition { from: JobStatus, action: ControlAction },

    #[error("Source error: {0}")]
    Source(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Whether the job was ended by `cancel()`
    pub fn is_canceled(&self) -> bool {
        matches!(self, UploadError::Canceled { .. })
    }

    /// The user-supplied cancellation reason, if any
    pub fn cancel_message(&self) -> Option<&str> {
        match self {
            UploadError::Canceled { message } => message.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn remote(err: partwise_core::PartwiseError) -> Self {
        UploadError::Remote(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_message() {
        let err = UploadError::Canceled {
            message: Some("user requested".to_string()),
        };
        assert!(err.is_canceled());
        assert_eq!(err.cancel_message(), Some("user requested"));
        assert_eq!(err.to_string(), "Upload canceled: user requested");

        let err = UploadError::Canceled { message: None };
        assert_eq!(err.to_string(), "Upload canceled");
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = UploadError::SizeMismatch {
            expected: 10,
            actual: 9,
        };
        assert!(!err.is_canceled());
        assert_eq!(
            err.to_string(),
            "Upload failed. Expected object size 10, but got 9."
        );
    }
}
