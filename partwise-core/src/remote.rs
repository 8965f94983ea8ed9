//! Remote multipart service contract

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{BucketId, ContentMetadata, ObjectInfo, PartResult};
use crate::Result;

/// Parameters for opening a multipart session
#[derive(Debug, Clone)]
pub struct CreateUploadRequest {
    pub bucket: BucketId,
    /// Final key, prefix included
    pub key: String,
    pub content: ContentMetadata,
}

/// One part on its way to the remote store
#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub bucket: BucketId,
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub body: Bytes,
}

/// Callback receiving the bytes of the current part sent so far
pub type PartProgress<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Capabilities of an object store that supports multipart sessions.
///
/// Implementations are not expected to retry. In-flight calls are cancelled by
/// dropping their futures.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Open a session and return its upload id
    async fn create_multipart_upload(&self, request: &CreateUploadRequest) -> Result<String>;

    /// Store one part and return its e-tag
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        on_progress: PartProgress<'_>,
    ) -> Result<String>;

    /// Parts already stored for a session. Fails when the session is gone.
    async fn list_parts(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartResult>>;

    /// Commit parts, which must be ascending and contiguous, into one object
    async fn complete_multipart_upload(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<String>;

    async fn abort_multipart_upload(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
    ) -> Result<()>;

    async fn head_object(&self, bucket: &BucketId, key: &str) -> Result<ObjectInfo>;
}
