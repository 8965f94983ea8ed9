//! Multipart remote backed by a local directory
//!
//! Layout under the root:
//!
//! ```text
//! .uploads/<upload id>/session.json   bucket, key and content metadata
//! .uploads/<upload id>/part-00001     part bodies
//! <bucket>/<key>                      finished objects
//! ```

use async_trait::async_trait;
use partwise_core::{
    BucketId, ContentMetadata, CreateUploadRequest, ObjectInfo, PartProgress, PartResult,
    PartwiseError, RemoteSession, Result, UploadPartRequest,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const UPLOADS_DIR: &str = ".uploads";
const SESSION_FILE: &str = "session.json";
const PART_PREFIX: &str = "part-";
/// Progress is reported after every chunk of this size
const WRITE_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    bucket: BucketId,
    key: String,
    content: ContentMetadata,
}

/// Directory standing in for an object store
#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(UPLOADS_DIR)).await?;
        Ok(DirRemote { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a finished object
    pub fn object_path(&self, bucket: &BucketId, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(bucket.as_str()).join(key))
    }

    /// Ids of sessions that are neither completed nor aborted
    pub async fn pending_uploads(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(self.root.join(UPLOADS_DIR)).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PartwiseError::UploadNotFound {
                upload_id: upload_id.to_string(),
            });
        }
        Ok(self.root.join(UPLOADS_DIR).join(upload_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("{}{:05}", PART_PREFIX, part_number))
    }

    /// Load a session and check it belongs to `bucket`/`key`
    async fn open_session(&self, bucket: &BucketId, key: &str, upload_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(upload_id)?;
        let raw = match fs::read(dir.join(SESSION_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PartwiseError::UploadNotFound {
                    upload_id: upload_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let session: Session = serde_json::from_slice(&raw)?;
        if &session.bucket != bucket || session.key != key {
            return Err(PartwiseError::UploadNotFound {
                upload_id: upload_id.to_string(),
            });
        }
        Ok(dir)
    }
}

fn validate_key(key: &str) -> Result<()> {
    let safe = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(PartwiseError::InvalidKey(format!(
            "key cannot be stored as a path: {}",
            key
        )))
    }
}

fn e_tag_of(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Write through a temp file and rename so readers never see partial content
async fn write_atomic(path: &Path, chunks: &[&[u8]], on_chunk: impl Fn(u64)) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", ulid::Ulid::new()));
    let mut written = 0u64;
    {
        let mut file = fs::File::create(&temp_path).await?;
        for chunk in chunks {
            for piece in chunk.chunks(WRITE_CHUNK_SIZE) {
                file.write_all(piece).await?;
                written += piece.len() as u64;
                on_chunk(written);
            }
        }
        file.sync_all().await?;
    }
    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl RemoteSession for DirRemote {
    async fn create_multipart_upload(&self, request: &CreateUploadRequest) -> Result<String> {
        validate_key(&request.key)?;
        let upload_id = ulid::Ulid::new().to_string();
        let dir = self.session_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;

        let session = Session {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            content: request.content.clone(),
        };
        let raw = serde_json::to_vec_pretty(&session)?;
        write_atomic(&dir.join(SESSION_FILE), &[&raw], |_| {}).await?;

        info!(key = %request.key, %upload_id, "opened upload session");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        on_progress: PartProgress<'_>,
    ) -> Result<String> {
        if request.part_number == 0 {
            return Err(PartwiseError::Internal("part numbers start at 1".to_string()));
        }
        let dir = self
            .open_session(&request.bucket, &request.key, &request.upload_id)
            .await?;
        let path = Self::part_path(&dir, request.part_number);
        write_atomic(&path, &[&request.body], on_progress).await?;
        on_progress(request.body.len() as u64);

        debug!(
            upload_id = %request.upload_id,
            part_number = request.part_number,
            bytes = request.body.len(),
            "stored part"
        );
        Ok(e_tag_of(&request.body))
    }

    async fn list_parts(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartResult>> {
        let dir = self.open_session(bucket, key, upload_id).await?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PART_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let body = fs::read(entry.path()).await?;
            parts.push(PartResult::new(number, e_tag_of(&body)));
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<String> {
        let dir = self.open_session(bucket, key, upload_id).await?;
        if parts.is_empty() {
            return Err(PartwiseError::Internal("no parts to complete".to_string()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(PartwiseError::Internal(
                "parts must be listed in ascending order".to_string(),
            ));
        }

        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension(format!("tmp.{}", ulid::Ulid::new()));
        let mut digest = blake3::Hasher::new();
        let assembled = async {
            let mut file = fs::File::create(&temp_path).await?;
            for part in parts {
                let body = match fs::read(Self::part_path(&dir, part.part_number)).await {
                    Ok(body) => body,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(PartwiseError::Storage(format!(
                            "part {} was never uploaded",
                            part.part_number
                        )))
                    }
                    Err(e) => return Err(e.into()),
                };
                if e_tag_of(&body) != part.e_tag {
                    return Err(PartwiseError::Storage(format!(
                        "e-tag mismatch for part {}",
                        part.part_number
                    )));
                }
                digest.update(part.e_tag.as_bytes());
                file.write_all(&body).await?;
            }
            file.sync_all().await?;
            Ok::<(), PartwiseError>(())
        }
        .await;
        if let Err(e) = assembled {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        fs::rename(&temp_path, &path).await?;
        fs::remove_dir_all(&dir).await?;

        let e_tag = format!("{}-{}", digest.finalize().to_hex(), parts.len());
        info!(%key, %upload_id, parts = parts.len(), "completed upload");
        Ok(e_tag)
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &BucketId,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let dir = self.open_session(bucket, key, upload_id).await?;
        fs::remove_dir_all(&dir).await?;
        info!(%key, %upload_id, "aborted upload");
        Ok(())
    }

    async fn head_object(&self, bucket: &BucketId, key: &str) -> Result<ObjectInfo> {
        match fs::metadata(self.object_path(bucket, key)?).await {
            Ok(metadata) if metadata.is_file() => Ok(ObjectInfo {
                size: metadata.len(),
            }),
            Ok(_) => Err(PartwiseError::ObjectNotFound {
                key: key.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PartwiseError::ObjectNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
