//! Resumable, pausable multipart upload engine
//!
//! An [`Uploader`] turns a [`PartSource`] into an upload job. Jobs split the
//! source into numbered parts, push them through a bounded pool of concurrent
//! uploaders and finalize the remote object with the parts in ascending
//! order. The remote session is remembered in an identity cache so that a
//! restarted process can pick up where the previous one left off.

pub mod abort;
pub mod client;
pub mod error;
pub mod identity;
pub mod job;
mod pool;
pub mod progress;
pub mod source;
pub mod state;

pub use abort::{AbortController, AbortReason, AbortSignal};
pub use client::{UploadInput, Uploader};
pub use error::UploadError;
pub use identity::InProgressUpload;
pub use job::{UploadControl, UploadTask};
pub use progress::{ProgressAggregator, ProgressCallback, ProgressListener};
pub use source::{BytesSource, FileSource, PartSource};
pub use state::{transition, ControlAction, JobStatus};

pub type Result<T> = std::result::Result<T, UploadError>;
