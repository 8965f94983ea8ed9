//! Upload configuration and part-size planning

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{PartwiseError, Result};

/// Part size used when the caller does not choose one (5 MiB)
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Smallest non-final part most object stores accept (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Upper bound on parts per multipart session
pub const MAX_PARTS_COUNT: u32 = 10_000;

/// Largest object a multipart session may produce (5 TiB)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Concurrent part uploads per job
pub const DEFAULT_QUEUE_SIZE: usize = 4;

/// Age after which a cached upload session is no longer trusted
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Tunables for an uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Explicit part size. When unset the size is derived from the source size.
    pub part_size: Option<u64>,
    /// Lower bound enforced on an explicit part size
    pub min_part_size: u64,
    /// Number of concurrent part uploads
    pub queue_size: usize,
    /// Maximum age of a cached session record
    pub cache_ttl: Duration,
    /// Head the finished object and compare its size with the declared one
    pub verify_size: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            part_size: None,
            min_part_size: MIN_PART_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            verify_size: true,
        }
    }
}

impl UploadConfig {
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the part plan for a source of the given size
    pub fn plan(&self, size: Option<u64>) -> Result<PartPlan> {
        if self.queue_size == 0 {
            return Err(PartwiseError::Internal("queue size must be at least 1".to_string()));
        }
        if let Some(size) = size {
            if size > MAX_OBJECT_SIZE {
                return Err(PartwiseError::ObjectTooLarge {
                    size,
                    max: MAX_OBJECT_SIZE,
                });
            }
        }

        let part_size = match self.part_size {
            Some(part_size) => {
                if part_size == 0 || part_size < self.min_part_size {
                    return Err(PartwiseError::InvalidPartSize {
                        part_size,
                        min: self.min_part_size.max(1),
                    });
                }
                part_size
            }
            None => calculate_part_size(size),
        };

        let plan = PartPlan { part_size, size };
        if let Some(count) = plan.part_count_u64() {
            if count > MAX_PARTS_COUNT as u64 {
                return Err(PartwiseError::InvalidSize(format!(
                    "{} parts of {} bytes exceed the limit of {} parts",
                    count, part_size, MAX_PARTS_COUNT
                )));
            }
        }
        Ok(plan)
    }
}

/// Smallest power-of-two multiple of the default part size that keeps the
/// part count within `MAX_PARTS_COUNT`
pub fn calculate_part_size(size: Option<u64>) -> u64 {
    let Some(size) = size else {
        return DEFAULT_PART_SIZE;
    };
    let mut part_size = DEFAULT_PART_SIZE;
    while size.div_ceil(part_size) > MAX_PARTS_COUNT as u64 {
        part_size *= 2;
    }
    part_size
}

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based ordinal
    pub part_number: u32,
    pub offset: u64,
    /// Upper bound on the part length; exact when the source size is known
    pub len: u64,
}

/// How a source is cut into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    part_size: u64,
    size: Option<u64>,
}

impl PartPlan {
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Number of parts, if the source size is known. An empty source still
    /// produces one (empty) part.
    pub fn part_count(&self) -> Option<u32> {
        self.part_count_u64().map(|count| count as u32)
    }

    fn part_count_u64(&self) -> Option<u64> {
        self.size.map(|size| size.div_ceil(self.part_size).max(1))
    }

    /// Range of the given part, `None` when the part lies past the end
    pub fn range(&self, part_number: u32) -> Option<PartRange> {
        if part_number == 0 {
            return None;
        }
        let offset = (part_number as u64 - 1) * self.part_size;
        match self.size {
            Some(size) => {
                if part_number > self.part_count()? {
                    return None;
                }
                Some(PartRange {
                    part_number,
                    offset,
                    len: self.part_size.min(size - offset.min(size)),
                })
            }
            None => Some(PartRange {
                part_number,
                offset,
                len: self.part_size,
            }),
        }
    }
}
