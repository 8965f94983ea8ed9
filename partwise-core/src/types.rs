//! Core data types for partwise

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content type applied when the caller does not provide one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Remote bucket identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(String);

impl BucketId {
    /// Create a new bucket ID with validation
    pub fn new(name: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(crate::PartwiseError::InvalidBucketName("empty name".to_string()));
        }

        // Alphanumeric, hyphens, underscores and dots only
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(crate::PartwiseError::InvalidBucketName(format!(
                "invalid characters in '{}'",
                name
            )));
        }

        Ok(BucketId(name.to_string()))
    }

    /// Get the bucket name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key, relative to the resolved key prefix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a new key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::PartwiseError::InvalidKey("empty key".to_string()));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(crate::PartwiseError::InvalidKey(
                "control characters not allowed".to_string(),
            ));
        }

        Ok(Key(key.to_string()))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join this key onto a resolved key prefix
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility class of an upload, mapped to a key prefix by the config resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Guest,
    Protected,
    Private,
}

impl AccessLevel {
    /// Name used in key prefixes and fingerprints. Guest uploads live under `public/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Guest => "public",
            AccessLevel::Protected => "protected",
            AccessLevel::Private => "private",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = crate::PartwiseError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "guest" | "public" => Ok(AccessLevel::Guest),
            "protected" => Ok(AccessLevel::Protected),
            "private" => Ok(AccessLevel::Private),
            other => Err(crate::PartwiseError::Config(format!(
                "unknown access level '{}'",
                other
            ))),
        }
    }
}

/// Headers and user metadata attached to the uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Default for ContentMetadata {
    fn default() -> Self {
        ContentMetadata {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_disposition: None,
            content_encoding: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl ContentMetadata {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A part committed to the remote multipart session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,
    /// Opaque tag returned by the remote store, passed back verbatim on finalize
    pub e_tag: String,
}

impl PartResult {
    pub fn new(part_number: u32, e_tag: impl Into<String>) -> Self {
        PartResult {
            part_number,
            e_tag: e_tag.into(),
        }
    }
}

/// Descriptor of a finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedObject {
    pub key: Key,
    pub e_tag: String,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

/// Remote view of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub size: u64,
}

/// Bucket and key prefix an attempt uploads into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub bucket: BucketId,
    pub key_prefix: String,
}

/// Cumulative transfer progress of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub loaded: u64,
    /// Declared source size, unknown for unsized sources
    pub total: Option<u64>,
}
