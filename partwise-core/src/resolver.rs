//! Storage configuration resolution

use async_trait::async_trait;

use crate::types::{AccessLevel, BucketId, ResolvedConfig};
use crate::{PartwiseError, Result};

/// Resolves the bucket and key prefix for an upload attempt.
///
/// Called on every start and resume since the answer may depend on
/// credentials that change between attempts.
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self, access_level: AccessLevel) -> Result<ResolvedConfig>;
}

/// Resolver for a fixed bucket and, optionally, a fixed identity
#[derive(Debug, Clone)]
pub struct StaticConfigResolver {
    bucket: BucketId,
    identity_id: Option<String>,
}

impl StaticConfigResolver {
    pub fn new(bucket: BucketId) -> Self {
        StaticConfigResolver {
            bucket,
            identity_id: None,
        }
    }

    /// Identity used for `protected/` and `private/` prefixes
    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// Key prefix for an access level
    pub fn key_prefix(&self, access_level: AccessLevel) -> Result<String> {
        match access_level {
            AccessLevel::Guest => Ok("public/".to_string()),
            level => {
                let identity = self.identity_id.as_deref().ok_or_else(|| {
                    PartwiseError::Config(format!(
                        "{} uploads require an identity id",
                        level.as_str()
                    ))
                })?;
                Ok(format!("{}/{}/", level.as_str(), identity))
            }
        }
    }
}

#[async_trait]
impl ConfigResolver for StaticConfigResolver {
    async fn resolve(&self, access_level: AccessLevel) -> Result<ResolvedConfig> {
        Ok(ResolvedConfig {
            bucket: self.bucket.clone(),
            key_prefix: self.key_prefix(access_level)?,
        })
    }
}
