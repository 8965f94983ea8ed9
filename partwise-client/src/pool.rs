//! Bounded pool of part uploaders sharing one cursor over part numbers

use futures::future::try_join_all;
use partwise_core::{BucketId, PartPlan, PartRange, PartResult, RemoteSession, UploadPartRequest};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::abort::AbortSignal;
use crate::progress::{ProgressAggregator, ProgressListener};
use crate::source::PartSource;
use crate::{Result, UploadError};

/// Hands out part numbers in ascending order until the source runs out
struct PartCursor {
    next: AtomicU32,
    exhausted: AtomicBool,
}

impl PartCursor {
    fn new() -> Self {
        PartCursor {
            next: AtomicU32::new(1),
            exhausted: AtomicBool::new(false),
        }
    }

    fn next(&self, plan: &PartPlan) -> Option<PartRange> {
        if self.exhausted.load(Ordering::Acquire) {
            return None;
        }
        let part_number = self.next.fetch_add(1, Ordering::AcqRel);
        plan.range(part_number)
    }

    /// Mark the end of an unsized source
    fn exhaust(&self) {
        self.exhausted.store(true, Ordering::Release);
    }
}

/// One attempt's worth of part uploads
pub(crate) struct PartPool<'a> {
    pub remote: &'a dyn RemoteSession,
    pub source: &'a dyn PartSource,
    pub plan: PartPlan,
    pub bucket: &'a BucketId,
    pub key: &'a str,
    pub upload_id: &'a str,
    /// Part numbers finished by an earlier attempt or session
    pub completed: HashSet<u32>,
    pub signal: &'a AbortSignal,
    pub progress: &'a Arc<ProgressAggregator>,
    pub on_part: &'a (dyn Fn(PartResult) + Send + Sync),
}

impl PartPool<'_> {
    /// Run `workers` concurrent uploaders until every part is done.
    ///
    /// The first failing worker tears the pool down: the remaining workers'
    /// futures are dropped, which cancels their in-flight uploads.
    pub(crate) async fn run(&self, workers: usize) -> Result<()> {
        let cursor = PartCursor::new();
        let workers = (0..workers.max(1)).map(|_| self.worker(&cursor, self.progress.listener()));
        try_join_all(workers).await?;
        Ok(())
    }

    async fn worker(&self, cursor: &PartCursor, listener: ProgressListener) -> Result<()> {
        let mut transferred = 0u64;
        loop {
            if let Some(reason) = self.signal.reason() {
                return Err(UploadError::Aborted(reason));
            }
            let Some(range) = cursor.next(&self.plan) else {
                return Ok(());
            };

            if self.completed.contains(&range.part_number) {
                debug!(part_number = range.part_number, "part already uploaded");
                if self.plan.size().is_some() {
                    transferred += range.len;
                    listener.report(transferred);
                }
                continue;
            }

            let Some(body) = self.source.read_part(range).await? else {
                cursor.exhaust();
                return Ok(());
            };
            let part_len = body.len() as u64;
            let base = transferred;
            let on_progress = |sent: u64| listener.report(base + sent.min(part_len));

            let request = UploadPartRequest {
                bucket: self.bucket.clone(),
                key: self.key.to_string(),
                upload_id: self.upload_id.to_string(),
                part_number: range.part_number,
                body,
            };
            let e_tag = self
                .signal
                .guard(async {
                    self.remote
                        .upload_part(request, &on_progress)
                        .await
                        .map_err(UploadError::remote)
                })
                .await?;

            transferred = base + part_len;
            listener.report(transferred);
            debug!(part_number = range.part_number, bytes = part_len, "part uploaded");
            (self.on_part)(PartResult::new(range.part_number, e_tag));
        }
    }
}
