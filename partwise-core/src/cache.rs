//! Upload identity cache contract and an in-memory implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

use crate::fingerprint::{Fingerprint, FingerprintInputs};
use crate::types::PartResult;
use crate::{PartwiseError, Result};

/// Resumable identity of an in-flight multipart session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub inputs: FingerprintInputs,
    pub upload_id: String,
    pub completed_parts: Vec<PartResult>,
    /// Milliseconds since the Unix epoch
    pub last_touched: u64,
}

impl CacheRecord {
    pub fn new(inputs: FingerprintInputs, upload_id: impl Into<String>) -> Self {
        CacheRecord {
            inputs,
            upload_id: upload_id.into(),
            completed_parts: Vec::new(),
            last_touched: now_ms(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.inputs.fingerprint()
    }

    /// Whether the record was last touched longer than `ttl` ago
    pub fn is_expired(&self, ttl: Duration) -> bool {
        now_ms().saturating_sub(self.last_touched) > ttl.as_millis() as u64
    }

    pub fn touch(&mut self) {
        self.last_touched = now_ms();
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Persistent store of upload identities, shared across jobs.
///
/// Records are written whole; a `put` for an existing fingerprint replaces it.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>>;

    async fn put(&self, record: &CacheRecord) -> Result<()>;

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()>;
}

/// Process-local identity cache
#[derive(Default)]
pub struct MemoryIdentityCache {
    records: Mutex<HashMap<Fingerprint, CacheRecord>>,
}

impl MemoryIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> PartwiseError {
    PartwiseError::Cache("identity cache lock poisoned".to_string())
}

#[async_trait]
impl IdentityCache for MemoryIdentityCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>> {
        Ok(self.records.lock().map_err(poisoned)?.get(fingerprint).cloned())
    }

    async fn put(&self, record: &CacheRecord) -> Result<()> {
        let fingerprint = record.fingerprint();
        trace!(%fingerprint, upload_id = %record.upload_id, "caching upload record");
        self.records
            .lock()
            .map_err(poisoned)?
            .insert(fingerprint, record.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        let removed = self.records.lock().map_err(poisoned)?.remove(fingerprint);
        trace!(%fingerprint, found = removed.is_some(), "removed upload record");
        Ok(())
    }
}
