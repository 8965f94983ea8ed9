//! Identity cache persisted in a fjall partition

use async_trait::async_trait;
use fjall::Partition;
use partwise_core::{CacheRecord, Fingerprint, IdentityCache, PartwiseError, Result};
use std::time::Duration;
use tracing::debug;

use crate::StoreEngine;

const PARTITION: &str = "uploads";

/// Upload identities keyed by fingerprint, stored as JSON
#[derive(Clone)]
pub struct FjallIdentityCache {
    engine: StoreEngine,
    partition: Partition,
}

impl FjallIdentityCache {
    pub fn open(engine: StoreEngine) -> Result<Self> {
        let partition = engine.partition(PARTITION)?;
        Ok(FjallIdentityCache { engine, partition })
    }

    fn record_key(fingerprint: &Fingerprint) -> String {
        format!("upload:{}", fingerprint.as_str())
    }

    /// All stored records, oldest first
    pub fn records(&self) -> Result<Vec<CacheRecord>> {
        let mut records = Vec::new();
        for item in self.partition.prefix("upload:") {
            let (_, value) = item.map_err(|e| PartwiseError::Storage(e.to_string()))?;
            records.push(serde_json::from_slice::<CacheRecord>(&value)?);
        }
        records.sort_by_key(|r| r.last_touched);
        Ok(records)
    }

    /// Delete records untouched for longer than `ttl`, returning how many went
    pub fn prune_expired(&self, ttl: Duration) -> Result<usize> {
        let mut pruned = 0;
        for record in self.records()? {
            if record.is_expired(ttl) {
                self.partition
                    .remove(Self::record_key(&record.fingerprint()).as_bytes())
                    .map_err(|e| PartwiseError::Storage(e.to_string()))?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            self.engine.persist()?;
            debug!(pruned, "pruned expired upload records");
        }
        Ok(pruned)
    }
}

#[async_trait]
impl IdentityCache for FjallIdentityCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>> {
        match self.partition.get(Self::record_key(fingerprint)) {
            Ok(Some(value)) => Ok(Some(serde_json::from_slice(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PartwiseError::Storage(e.to_string())),
        }
    }

    async fn put(&self, record: &CacheRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.partition
            .insert(Self::record_key(&record.fingerprint()).as_bytes(), value)
            .map_err(|e| PartwiseError::Storage(e.to_string()))?;
        self.engine.persist()
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.partition
            .remove(Self::record_key(fingerprint).as_bytes())
            .map_err(|e| PartwiseError::Storage(e.to_string()))?;
        self.engine.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partwise_core::{AccessLevel, BucketId, FingerprintInputs, Key, PartResult};

    fn record(key: &str, upload_id: &str) -> CacheRecord {
        CacheRecord::new(
            FingerprintInputs {
                source: None,
                size: 42,
                part_size: 42,
                content_type: "text/plain".to_string(),
                bucket: BucketId::new("bucket").unwrap(),
                access_level: AccessLevel::Guest,
                key: Key::new(key).unwrap(),
            },
            upload_id,
        )
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let cache = FjallIdentityCache::open(engine).unwrap();

        let mut record = record("a.txt", "upload-1");
        record.completed_parts.push(PartResult::new(1, "etag-1"));
        let fingerprint = record.fingerprint();

        assert!(cache.get(&fingerprint).await.unwrap().is_none());
        cache.put(&record).await.unwrap();
        assert_eq!(cache.get(&fingerprint).await.unwrap(), Some(record));

        cache.remove(&fingerprint).await.unwrap();
        assert!(cache.get(&fingerprint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let (engine, _temp) = StoreEngine::temp().unwrap();
        let cache = FjallIdentityCache::open(engine).unwrap();

        let fresh = record("fresh.txt", "upload-1");
        let mut stale = record("stale.txt", "upload-2");
        stale.last_touched = 0;
        cache.put(&fresh).await.unwrap();
        cache.put(&stale).await.unwrap();

        assert_eq!(cache.prune_expired(Duration::from_secs(3600)).unwrap(), 1);
        let remaining = cache.records().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].upload_id, "upload-1");
    }
}
