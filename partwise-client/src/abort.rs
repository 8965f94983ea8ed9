//! Abort boundary for one upload attempt
//!
//! Pause and cancel share the same primitive; the reason travels with the
//! signal so the attempt's error handler can tell them apart.

use std::future::Future;
use tokio::sync::watch;

use crate::{Result, UploadError};

/// Why an attempt was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    PauseRequested,
    CancelRequested(Option<String>),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::PauseRequested => write!(f, "pause requested"),
            AbortReason::CancelRequested(None) => write!(f, "cancel requested"),
            AbortReason::CancelRequested(Some(message)) => {
                write!(f, "cancel requested ({})", message)
            }
        }
    }
}

/// Owner side of an abort boundary
#[derive(Debug)]
pub struct AbortController {
    sender: watch::Sender<Option<AbortReason>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        AbortController { sender }
    }

    /// Create a signal observing this controller
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Fire the signal. The first reason wins; returns false if it had already fired.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.sender.borrow().clone()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of an abort boundary
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<Option<AbortReason>>,
}

impl AbortSignal {
    pub fn reason(&self) -> Option<AbortReason> {
        self.receiver.borrow().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Resolves once the signal fires. Never resolves if the controller is
    /// dropped without firing.
    pub async fn aborted(&self) -> AbortReason {
        let mut receiver = self.receiver.clone();
        loop {
            if let Some(reason) = receiver.borrow_and_update().clone() {
                return reason;
            }
            if receiver.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Run `operation` unless the signal fires first, in which case the
    /// operation is dropped and `UploadError::Aborted` is returned.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(reason) = self.reason() {
            return Err(UploadError::Aborted(reason));
        }
        tokio::select! {
            biased;
            reason = self.aborted() => Err(UploadError::Aborted(reason)),
            outcome = operation => outcome,
        }
    }
}
