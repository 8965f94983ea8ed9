//! Fingerprints identifying "the same logical upload" across sessions

use serde::{Deserialize, Serialize};

use crate::types::{AccessLevel, BucketId, Key};

/// Content identity of a data source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceIdentity {
    /// File name plus modification time in milliseconds since the epoch
    File { name: String, modified_ms: u64 },
    /// BLAKE3 digest of the full content, hex encoded
    Digest(String),
}

impl SourceIdentity {
    /// Identity of an in-memory buffer
    pub fn digest_of(data: &[u8]) -> Self {
        SourceIdentity::Digest(blake3::hash(data).to_hex().to_string())
    }
}

/// Everything that must match for a cached upload session to be reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintInputs {
    pub source: Option<SourceIdentity>,
    pub size: u64,
    /// Part boundaries of the session; a different split cannot reuse its parts
    #[serde(default)]
    pub part_size: u64,
    pub content_type: String,
    pub bucket: BucketId,
    pub access_level: AccessLevel,
    pub key: Key,
}

impl FingerprintInputs {
    /// Derive the cache key for these inputs
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        if let Some(source) = &self.source {
            match source {
                SourceIdentity::File { name, modified_ms } => {
                    hasher.update(b"file\0");
                    hasher.update(name.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(&modified_ms.to_le_bytes());
                }
                SourceIdentity::Digest(digest) => {
                    hasher.update(b"digest\0");
                    hasher.update(digest.as_bytes());
                }
            }
        }
        hasher.update(b"\0");
        hasher.update(&self.size.to_le_bytes());
        hasher.update(&self.part_size.to_le_bytes());
        for field in [
            self.content_type.as_str(),
            self.bucket.as_str(),
            self.access_level.as_str(),
            self.key.as_str(),
        ] {
            hasher.update(b"\0");
            hasher.update(field.as_bytes());
        }
        Fingerprint(hasher.finalize().to_hex().to_string())
    }
}

/// Hex-encoded BLAKE3 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a previously derived fingerprint, e.g. one read back from storage
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
