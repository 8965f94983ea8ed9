//! Persistent backends for partwise: a fjall identity cache and a
//! directory-backed multipart remote

use fjall::{Config, Keyspace, Partition, PartitionCreateOptions, PersistMode};
use partwise_core::{PartwiseError, Result};
use std::path::Path;
use std::sync::Arc;

pub mod cache;
pub mod remote;

pub use cache::FjallIdentityCache;
pub use remote::DirRemote;

/// Storage engine wrapping a fjall keyspace
#[derive(Clone)]
pub struct StoreEngine {
    keyspace: Arc<Keyspace>,
}

impl StoreEngine {
    /// Open or create the keyspace at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let keyspace = Config::new(path)
            .open()
            .map_err(|e| PartwiseError::Storage(e.to_string()))?;
        Ok(StoreEngine {
            keyspace: Arc::new(keyspace),
        })
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    pub(crate) fn partition(&self, name: &str) -> Result<Partition> {
        self.keyspace
            .open_partition(name, PartitionCreateOptions::default())
            .map_err(|e| PartwiseError::Storage(e.to_string()))
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| PartwiseError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_engine_creation() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        assert!(engine.partition("uploads").is_ok());
        engine.persist().unwrap();
    }
}
