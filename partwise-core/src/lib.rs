//! Core data models, configuration and capability contracts for partwise

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod remote;
pub mod resolver;
pub mod types;

pub use cache::*;
pub use config::*;
pub use error::*;
pub use fingerprint::*;
pub use remote::*;
pub use resolver::*;
pub use types::*;

/// Result type alias for partwise core operations
pub type Result<T> = std::result::Result<T, PartwiseError>;
