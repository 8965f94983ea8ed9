#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use partwise_core::{
    BucketId, CreateUploadRequest, IdentityCache, MemoryIdentityCache, ObjectInfo, PartProgress,
    PartResult, PartwiseError, RemoteSession, Result, StaticConfigResolver, UploadConfig,
    UploadPartRequest,
};
use partwise_client::Uploader;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const BUCKET: &str = "test-bucket";

#[derive(Default)]
struct MockUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
    aborted: bool,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    uploads: HashMap<String, MockUpload>,
    objects: HashMap<String, Bytes>,
    created: Vec<String>,
    started: Vec<u32>,
    uploaded: Vec<u32>,
    listed: usize,
    completed: Vec<(String, Vec<u32>)>,
    aborted: Vec<String>,
    hold_from: Option<u32>,
    fail_part: Option<(u32, usize)>,
    fail_list: bool,
    fail_abort: bool,
    head_size: Option<u64>,
    delays: HashMap<u32, Duration>,
}

/// In-memory multipart remote that records every call
pub struct MockRemote {
    state: Mutex<MockState>,
    release: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even when the upload future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(MockRemote {
            state: Mutex::new(MockState::default()),
            release: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Block uploads of parts numbered `part_number` and above until `release()`
    pub fn hold_parts_from(&self, part_number: u32) {
        self.state().hold_from = Some(part_number);
    }

    pub fn release(&self) {
        self.state().hold_from = None;
        self.release.add_permits(1 << 20);
    }

    /// Fail the next `times` uploads of `part_number`
    pub fn fail_part(&self, part_number: u32, times: usize) {
        self.state().fail_part = Some((part_number, times));
    }

    pub fn fail_list_parts(&self) {
        self.state().fail_list = true;
    }

    pub fn fail_abort(&self) {
        self.state().fail_abort = true;
    }

    /// Report this size from `head_object` regardless of the stored object
    pub fn override_head_size(&self, size: u64) {
        self.state().head_size = Some(size);
    }

    pub fn delay_part(&self, part_number: u32, delay: Duration) {
        self.state().delays.insert(part_number, delay);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub fn started_parts(&self) -> Vec<u32> {
        self.state().started.clone()
    }

    pub fn uploaded_parts(&self) -> Vec<u32> {
        self.state().uploaded.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().listed
    }

    pub fn completed(&self) -> Vec<(String, Vec<u32>)> {
        self.state().completed.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state().aborted.clone()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).cloned()
    }
}

#[async_trait]
impl RemoteSession for MockRemote {
    async fn create_multipart_upload(&self, request: &CreateUploadRequest) -> Result<String> {
        let mut state = self.state();
        state.next_id += 1;
        let upload_id = format!("upload-{}", state.next_id);
        state.uploads.insert(
            upload_id.clone(),
            MockUpload {
                key: request.key.clone(),
                ..MockUpload::default()
            },
        );
        state.created.push(upload_id.clone());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        on_progress: PartProgress<'_>,
    ) -> Result<String> {
        let part_number = request.part_number;
        let (held, delay, fail) = {
            let mut state = self.state();
            state.started.push(part_number);
            let held = state.hold_from.is_some_and(|from| part_number >= from);
            let fail = match &mut state.fail_part {
                Some((n, times)) if *n == part_number && *times > 0 => {
                    *times -= 1;
                    true
                }
                _ => false,
            };
            (held, state.delays.get(&part_number).copied(), fail)
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        on_progress(request.body.len() as u64 / 2);
        if held {
            let permit = self
                .release
                .acquire()
                .await
                .map_err(|e| PartwiseError::Storage(e.to_string()))?;
            permit.forget();
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        tokio::task::yield_now().await;
        if fail {
            return Err(PartwiseError::Storage(format!(
                "injected failure for part {}",
                part_number
            )));
        }

        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(&request.upload_id)
            .filter(|u| !u.aborted)
            .ok_or_else(|| PartwiseError::UploadNotFound {
                upload_id: request.upload_id.clone(),
            })?;
        let e_tag = format!("etag-{}", part_number);
        upload
            .parts
            .insert(part_number, (e_tag.clone(), request.body.clone()));
        state.uploaded.push(part_number);
        on_progress(request.body.len() as u64);
        Ok(e_tag)
    }

    async fn list_parts(
        &self,
        _bucket: &BucketId,
        _key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartResult>> {
        let mut state = self.state();
        state.listed += 1;
        if state.fail_list {
            return Err(PartwiseError::Storage("list parts unavailable".to_string()));
        }
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| !u.aborted)
            .ok_or_else(|| PartwiseError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })?;
        Ok(upload
            .parts
            .iter()
            .map(|(n, (e_tag, _))| PartResult::new(*n, e_tag.clone()))
            .collect())
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &BucketId,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<String> {
        let mut state = self.state();
        state.completed.push((
            upload_id.to_string(),
            parts.iter().map(|p| p.part_number).collect(),
        ));
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| !u.aborted && u.key == key)
            .ok_or_else(|| PartwiseError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })?;
        let mut object = Vec::new();
        for part in parts {
            let (_, body) = upload.parts.get(&part.part_number).ok_or_else(|| {
                PartwiseError::Storage(format!("part {} was never uploaded", part.part_number))
            })?;
            object.extend_from_slice(body);
        }
        state.objects.insert(key.to_string(), Bytes::from(object));
        Ok(format!("etag-final-{}", parts.len()))
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &BucketId,
        _key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.aborted.push(upload_id.to_string());
        if state.fail_abort {
            return Err(PartwiseError::Storage("abort unavailable".to_string()));
        }
        if let Some(upload) = state.uploads.get_mut(upload_id) {
            upload.aborted = true;
        }
        Ok(())
    }

    async fn head_object(&self, _bucket: &BucketId, key: &str) -> Result<ObjectInfo> {
        let state = self.state();
        if let Some(size) = state.head_size {
            return Ok(ObjectInfo { size });
        }
        state
            .objects
            .get(key)
            .map(|object| ObjectInfo {
                size: object.len() as u64,
            })
            .ok_or_else(|| PartwiseError::ObjectNotFound {
                key: key.to_string(),
            })
    }
}

/// Config with tiny parts so tests can work with a handful of bytes
pub fn small_parts(part_size: u64, queue_size: usize) -> UploadConfig {
    UploadConfig {
        part_size: Some(part_size),
        min_part_size: 1,
        queue_size,
        ..UploadConfig::default()
    }
}

pub fn bucket() -> BucketId {
    BucketId::new(BUCKET).unwrap()
}

pub fn uploader(
    remote: &Arc<MockRemote>,
    cache: Arc<dyn IdentityCache>,
    config: UploadConfig,
) -> Uploader {
    let resolver = StaticConfigResolver::new(bucket()).with_identity("user-1");
    Uploader::new(remote.clone(), cache, Arc::new(resolver), config)
}

pub fn memory_cache() -> Arc<MemoryIdentityCache> {
    Arc::new(MemoryIdentityCache::new())
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
