//! Entry point for starting upload jobs

use partwise_core::{
    AccessLevel, ConfigResolver, ContentMetadata, IdentityCache, Key, RemoteSession,
    UploadConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::job::{Job, UploadTask};
use crate::progress::{ProgressAggregator, ProgressCallback};
use crate::source::PartSource;
use crate::state::ControlAction;
use crate::Result;

/// Capabilities shared by every job started from one uploader
#[derive(Clone)]
pub(crate) struct Services {
    pub remote: Arc<dyn RemoteSession>,
    pub cache: Arc<dyn IdentityCache>,
    pub resolver: Arc<dyn ConfigResolver>,
    pub config: UploadConfig,
}

/// What to upload and where
pub struct UploadInput {
    pub key: Key,
    pub source: Arc<dyn PartSource>,
    pub content: ContentMetadata,
    pub access_level: AccessLevel,
    pub on_progress: Option<ProgressCallback>,
}

impl UploadInput {
    pub fn new(key: Key, source: Arc<dyn PartSource>) -> Self {
        UploadInput {
            key,
            source,
            content: ContentMetadata::default(),
            access_level: AccessLevel::default(),
            on_progress: None,
        }
    }

    pub fn with_content(mut self, content: ContentMetadata) -> Self {
        self.content = content;
        self
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// Starts resumable multipart upload jobs against one remote
#[derive(Clone)]
pub struct Uploader {
    services: Services,
}

impl Uploader {
    pub fn new(
        remote: Arc<dyn RemoteSession>,
        cache: Arc<dyn IdentityCache>,
        resolver: Arc<dyn ConfigResolver>,
        config: UploadConfig,
    ) -> Self {
        Uploader {
            services: Services {
                remote,
                cache,
                resolver,
                config,
            },
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.services.config
    }

    /// Start an upload job.
    ///
    /// Size and part-size problems are reported here, before any remote call.
    /// Must be called from within a tokio runtime.
    pub fn upload(&self, input: UploadInput) -> Result<UploadTask> {
        let size = input.source.size();
        let plan = self.services.config.plan(size)?;
        info!(
            key = %input.key,
            size = ?size,
            part_size = plan.part_size(),
            parts = ?plan.part_count(),
            "starting upload"
        );

        let progress = ProgressAggregator::new(size, input.on_progress);
        let (sender, receiver) = mpsc::unbounded_channel();
        let job = Job::new(
            input.key,
            input.source,
            input.content,
            input.access_level,
            plan,
            self.services.clone(),
            progress,
            sender,
        );
        job.begin(ControlAction::Start)?;
        Ok(UploadTask::new(job, receiver))
    }
}
