//! Reconciliation of cached upload identity with the remote session

use partwise_core::{
    BucketId, CacheRecord, ContentMetadata, CreateUploadRequest, Fingerprint, FingerprintInputs,
    IdentityCache, PartResult, RemoteSession,
};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::{Result, UploadError};

/// The remote session a job is appending parts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgressUpload {
    pub upload_id: String,
    /// Completed parts in completion order
    pub completed_parts: Vec<PartResult>,
}

impl InProgressUpload {
    pub fn new(upload_id: impl Into<String>) -> Self {
        InProgressUpload {
            upload_id: upload_id.into(),
            completed_parts: Vec::new(),
        }
    }

    pub fn completed_numbers(&self) -> HashSet<u32> {
        self.completed_parts.iter().map(|p| p.part_number).collect()
    }

    /// Append a completed part. A part number seen before keeps its position
    /// but takes the newer e-tag.
    pub fn record(&mut self, part: PartResult) {
        match self
            .completed_parts
            .iter_mut()
            .find(|p| p.part_number == part.part_number)
        {
            Some(existing) => existing.e_tag = part.e_tag,
            None => self.completed_parts.push(part),
        }
    }

    /// Sort completed parts ascending by part number and return them
    pub fn sort_parts(&mut self) -> Vec<PartResult> {
        self.completed_parts.sort_by_key(|p| p.part_number);
        self.completed_parts.clone()
    }
}

/// Everything needed to find or open the session for a job
pub(crate) struct SessionLookup<'a> {
    pub remote: &'a dyn RemoteSession,
    pub cache: &'a dyn IdentityCache,
    pub bucket: &'a BucketId,
    pub final_key: &'a str,
    pub content: &'a ContentMetadata,
    /// Present only when the source size is known
    pub inputs: Option<&'a FingerprintInputs>,
    pub cache_ttl: Duration,
    pub signal: &'a AbortSignal,
}

/// Reuse a cached session if it is still valid, otherwise open a new one.
///
/// The cache is trusted only as far as the remote agrees: a cached upload id
/// is adopted only if its parts can still be listed, and the listed parts
/// replace whatever the record remembered.
pub(crate) async fn load_or_create(lookup: SessionLookup<'_>) -> Result<InProgressUpload> {
    if let Some(inputs) = lookup.inputs {
        if let Some(upload) = load_cached(&lookup, inputs).await? {
            return Ok(upload);
        }
    }

    let request = CreateUploadRequest {
        bucket: lookup.bucket.clone(),
        key: lookup.final_key.to_string(),
        content: lookup.content.clone(),
    };
    let upload_id = lookup
        .signal
        .guard(async {
            lookup
                .remote
                .create_multipart_upload(&request)
                .await
                .map_err(UploadError::remote)
        })
        .await?;
    info!(key = %lookup.final_key, %upload_id, "created multipart upload");

    if let Some(inputs) = lookup.inputs {
        let record = CacheRecord::new(inputs.clone(), upload_id.clone());
        if let Err(e) = lookup.cache.put(&record).await {
            warn!(error = %e, "failed to cache multipart upload; it will not survive a restart");
        }
    }

    Ok(InProgressUpload::new(upload_id))
}

async fn load_cached(
    lookup: &SessionLookup<'_>,
    inputs: &FingerprintInputs,
) -> Result<Option<InProgressUpload>> {
    let fingerprint = inputs.fingerprint();
    let mut record = match lookup.cache.get(&fingerprint).await {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(error = %e, "failed to read upload cache");
            return Ok(None);
        }
    };

    if &record.inputs != inputs {
        debug!(%fingerprint, "cached upload belongs to a different source, discarding");
        remove_cached(lookup.cache, &fingerprint).await;
        return Ok(None);
    }
    if record.is_expired(lookup.cache_ttl) {
        debug!(%fingerprint, "cached upload expired, discarding");
        remove_cached(lookup.cache, &fingerprint).await;
        return Ok(None);
    }

    let listed = lookup
        .signal
        .guard(async {
            lookup
                .remote
                .list_parts(lookup.bucket, lookup.final_key, &record.upload_id)
                .await
                .map_err(UploadError::remote)
        })
        .await;
    let parts = match listed {
        Ok(parts) => parts,
        Err(e @ UploadError::Aborted(_)) => return Err(e),
        Err(e) => {
            debug!(error = %e, upload_id = %record.upload_id, "cached upload is gone, discarding");
            remove_cached(lookup.cache, &fingerprint).await;
            return Ok(None);
        }
    };

    info!(
        key = %lookup.final_key,
        upload_id = %record.upload_id,
        parts = parts.len(),
        "resuming cached multipart upload"
    );
    record.completed_parts = parts.clone();
    record.touch();
    if let Err(e) = lookup.cache.put(&record).await {
        warn!(error = %e, "failed to refresh cached upload");
    }

    let mut upload = InProgressUpload::new(record.upload_id);
    for part in parts {
        upload.record(part);
    }
    Ok(Some(upload))
}

/// Delete a cache record, logging instead of failing
pub(crate) async fn remove_cached(cache: &dyn IdentityCache, fingerprint: &Fingerprint) {
    if let Err(e) = cache.remove(fingerprint).await {
        warn!(error = %e, %fingerprint, "failed to remove cached upload");
    }
}
