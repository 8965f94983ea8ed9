//! Upload job: the orchestrator state machine and its control handles

use partwise_core::{
    AccessLevel, ContentMetadata, Fingerprint, FingerprintInputs, Key, PartPlan, PartResult,
    ResolvedConfig, UploadedObject,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::abort::{AbortController, AbortReason, AbortSignal};
use crate::client::Services;
use crate::identity::{self, InProgressUpload, SessionLookup};
use crate::pool::PartPool;
use crate::progress::ProgressAggregator;
use crate::source::PartSource;
use crate::state::{transition, ControlAction, JobStatus};
use crate::{Result, UploadError};

struct JobState {
    status: JobStatus,
    /// Bumped on every start/resume; settles from older attempts are ignored
    generation: u64,
    abort: Option<AbortController>,
    in_progress: Option<InProgressUpload>,
    resolved: Option<ResolvedConfig>,
    cache_key: Option<Fingerprint>,
}

/// Remote and cached state to release after a cancel
struct Cleanup {
    cache_key: Option<Fingerprint>,
    session: Option<(ResolvedConfig, String)>,
}

pub(crate) struct Job {
    key: Key,
    source: Arc<dyn PartSource>,
    content: ContentMetadata,
    access_level: AccessLevel,
    plan: PartPlan,
    services: Services,
    progress: Arc<ProgressAggregator>,
    state: Mutex<JobState>,
    /// Serializes attempts so a paused attempt unwinds before its successor runs
    attempt_gate: tokio::sync::Mutex<()>,
    outcomes: mpsc::UnboundedSender<Result<UploadedObject>>,
    /// Runtime the job was created on; control calls may come from any thread
    runtime: Handle,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: Key,
        source: Arc<dyn PartSource>,
        content: ContentMetadata,
        access_level: AccessLevel,
        plan: PartPlan,
        services: Services,
        progress: Arc<ProgressAggregator>,
        outcomes: mpsc::UnboundedSender<Result<UploadedObject>>,
    ) -> Arc<Self> {
        Arc::new(Job {
            key,
            source,
            content,
            access_level,
            plan,
            services,
            progress,
            state: Mutex::new(JobState {
                status: JobStatus::Idle,
                generation: 0,
                abort: None,
                in_progress: None,
                resolved: None,
                cache_key: None,
            }),
            attempt_gate: tokio::sync::Mutex::new(()),
            outcomes,
            runtime: Handle::current(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, outcome: Result<UploadedObject>) {
        if self.outcomes.send(outcome).is_err() {
            debug!(key = %self.key, "upload result dropped, nobody is waiting");
        }
    }

    /// Start or resume: open a fresh abort boundary and spawn an attempt
    pub(crate) fn begin(self: &Arc<Self>, action: ControlAction) -> Result<()> {
        let (generation, signal) = {
            let mut state = self.lock();
            let next = transition(state.status, action).ok_or(UploadError::InvalidTransition {
                from: state.status,
                action,
            })?;
            state.status = next;
            state.generation += 1;
            let controller = AbortController::new();
            let signal = controller.signal();
            state.abort = Some(controller);
            (state.generation, signal)
        };

        debug!(key = %self.key, generation, %action, "starting upload attempt");
        let job = Arc::clone(self);
        self.runtime
            .spawn(async move { job.run_attempt(generation, signal).await });
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<()> {
        let mut state = self.lock();
        if matches!(
            state.status,
            JobStatus::Idle | JobStatus::Paused | JobStatus::Failed
        ) {
            // No attempt in flight
            return Ok(());
        }
        let next = transition(state.status, ControlAction::Pause).ok_or(
            UploadError::InvalidTransition {
                from: state.status,
                action: ControlAction::Pause,
            },
        )?;
        state.status = next;
        if let Some(controller) = &state.abort {
            controller.abort(AbortReason::PauseRequested);
        }
        info!(key = %self.key, "upload pause requested");
        Ok(())
    }

    pub(crate) fn cancel(&self, message: Option<String>) -> Result<()> {
        let cleanup = {
            let mut state = self.lock();
            let next = transition(state.status, ControlAction::Cancel).ok_or(
                UploadError::InvalidTransition {
                    from: state.status,
                    action: ControlAction::Cancel,
                },
            )?;
            state.status = next;
            if let Some(controller) = &state.abort {
                controller.abort(AbortReason::CancelRequested(message.clone()));
            }
            let upload_id = state.in_progress.take().map(|upload| upload.upload_id);
            Cleanup {
                cache_key: state.cache_key.take(),
                session: state.resolved.clone().zip(upload_id),
            }
        };

        info!(key = %self.key, reason = message.as_deref().unwrap_or(""), "upload canceled");
        self.spawn_cleanup(cleanup);
        self.deliver(Err(UploadError::Canceled { message }));
        Ok(())
    }

    /// Best-effort release of cached and remote state; failures are only logged
    fn spawn_cleanup(&self, cleanup: Cleanup) {
        let cache = Arc::clone(&self.services.cache);
        let remote = Arc::clone(&self.services.remote);
        let key = self.key.clone();
        self.runtime.spawn(async move {
            if let Some(fingerprint) = cleanup.cache_key {
                identity::remove_cached(cache.as_ref(), &fingerprint).await;
            }
            if let Some((resolved, upload_id)) = cleanup.session {
                let final_key = key.with_prefix(&resolved.key_prefix);
                match remote
                    .abort_multipart_upload(&resolved.bucket, &final_key, &upload_id)
                    .await
                {
                    Ok(()) => debug!(key = %final_key, %upload_id, "aborted multipart upload"),
                    Err(e) => {
                        warn!(error = %e, key = %final_key, %upload_id, "failed to abort multipart upload")
                    }
                }
            }
        });
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub(crate) fn in_progress(&self) -> Option<InProgressUpload> {
        self.lock().in_progress.clone()
    }

    pub(crate) fn loaded(&self) -> u64 {
        self.progress.loaded()
    }

    async fn run_attempt(self: Arc<Self>, generation: u64, signal: AbortSignal) {
        let _gate = self.attempt_gate.lock().await;
        {
            let state = self.lock();
            if state.generation != generation || state.status != JobStatus::Uploading {
                debug!(key = %self.key, generation, status = %state.status, "skipping superseded attempt");
                return;
            }
        }
        let outcome = self.attempt(&signal).await;
        self.settle(generation, &signal, outcome);
    }

    /// Route an attempt's outcome according to the job status and abort reason.
    ///
    /// A success always settles the job, even from a superseded attempt, since
    /// the remote object exists at that point. Failures of superseded attempts
    /// are dropped.
    fn settle(&self, generation: u64, signal: &AbortSignal, outcome: Result<UploadedObject>) {
        let mut state = self.lock();
        if state.generation != generation && outcome.is_err() {
            debug!(key = %self.key, generation, "ignoring outcome of superseded attempt");
            return;
        }

        match outcome {
            Ok(object) => match transition(state.status, ControlAction::Complete) {
                Some(next) => {
                    state.status = next;
                    state.abort = None;
                    state.in_progress = None;
                    state.cache_key = None;
                    drop(state);
                    info!(key = %object.key, e_tag = %object.e_tag, "upload completed");
                    self.deliver(Ok(object));
                }
                None => debug!(key = %self.key, status = %state.status, "discarding finished attempt"),
            },
            Err(err) => match signal.reason() {
                Some(AbortReason::PauseRequested) => {
                    debug!(key = %self.key, "upload paused");
                }
                Some(AbortReason::CancelRequested(_)) => {
                    debug!(key = %self.key, error = %err, "attempt ended by cancel");
                }
                None => match transition(state.status, ControlAction::Fail) {
                    Some(next) => {
                        state.status = next;
                        drop(state);
                        warn!(key = %self.key, error = %err, "upload failed");
                        self.deliver(Err(err));
                    }
                    None => debug!(key = %self.key, error = %err, "discarding failed attempt"),
                },
            },
        }
    }

    fn fingerprint_inputs(&self, resolved: &ResolvedConfig) -> Option<FingerprintInputs> {
        self.plan.size().map(|size| FingerprintInputs {
            source: self.source.identity(),
            size,
            part_size: self.plan.part_size(),
            content_type: self.content.content_type.clone(),
            bucket: resolved.bucket.clone(),
            access_level: self.access_level,
            key: self.key.clone(),
        })
    }

    fn record_part(&self, part: PartResult) {
        if let Some(upload) = self.lock().in_progress.as_mut() {
            upload.record(part);
        }
    }

    async fn attempt(&self, signal: &AbortSignal) -> Result<UploadedObject> {
        let services = &self.services;

        let resolved = signal
            .guard(async {
                services
                    .resolver
                    .resolve(self.access_level)
                    .await
                    .map_err(UploadError::from)
            })
            .await?;
        let final_key = self.key.with_prefix(&resolved.key_prefix);
        let inputs = self.fingerprint_inputs(&resolved);
        let cache_key = inputs.as_ref().map(FingerprintInputs::fingerprint);

        let existing = {
            let mut state = self.lock();
            state.resolved = Some(resolved.clone());
            state.cache_key = cache_key.clone();
            state.in_progress.clone()
        };

        let upload = match existing {
            Some(upload) => upload,
            None => {
                let upload = identity::load_or_create(SessionLookup {
                    remote: services.remote.as_ref(),
                    cache: services.cache.as_ref(),
                    bucket: &resolved.bucket,
                    final_key: &final_key,
                    content: &self.content,
                    inputs: inputs.as_ref(),
                    cache_ttl: services.config.cache_ttl,
                    signal,
                })
                .await?;

                let mut state = self.lock();
                if let Some(reason @ AbortReason::CancelRequested(_)) = signal.reason() {
                    // The cancel snapshot missed this session; release it here
                    drop(state);
                    self.spawn_cleanup(Cleanup {
                        cache_key: cache_key.clone(),
                        session: Some((resolved.clone(), upload.upload_id.clone())),
                    });
                    return Err(UploadError::Aborted(reason));
                }
                state.in_progress.get_or_insert(upload).clone()
            }
        };

        let completed = upload.completed_numbers();
        info!(
            key = %final_key,
            upload_id = %upload.upload_id,
            completed = completed.len(),
            parts = ?self.plan.part_count(),
            "uploading parts"
        );

        self.progress.reset();
        let on_part = |part: PartResult| self.record_part(part);
        let pool = PartPool {
            remote: services.remote.as_ref(),
            source: self.source.as_ref(),
            plan: self.plan,
            bucket: &resolved.bucket,
            key: &final_key,
            upload_id: &upload.upload_id,
            completed,
            signal,
            progress: &self.progress,
            on_part: &on_part,
        };
        pool.run(services.config.queue_size).await?;

        let parts = {
            let mut state = self.lock();
            let upload = state
                .in_progress
                .as_mut()
                .ok_or_else(|| UploadError::Internal("upload state discarded".to_string()))?;
            upload.sort_parts()
        };
        ensure_contiguous(&parts, self.plan.part_count())?;

        let e_tag = signal
            .guard(async {
                services
                    .remote
                    .complete_multipart_upload(
                        &resolved.bucket,
                        &final_key,
                        &upload.upload_id,
                        &parts,
                    )
                    .await
                    .map_err(UploadError::remote)
            })
            .await?;

        if let (true, Some(expected)) = (services.config.verify_size, self.plan.size()) {
            let info = signal
                .guard(async {
                    services
                        .remote
                        .head_object(&resolved.bucket, &final_key)
                        .await
                        .map_err(UploadError::remote)
                })
                .await?;
            if info.size != expected {
                return Err(UploadError::SizeMismatch {
                    expected,
                    actual: info.size,
                });
            }
        }

        if let Some(fingerprint) = &cache_key {
            identity::remove_cached(services.cache.as_ref(), fingerprint).await;
        }

        Ok(UploadedObject {
            key: self.key.clone(),
            e_tag,
            content_type: self.content.content_type.clone(),
            metadata: self.content.metadata.clone(),
        })
    }
}

/// Finalize needs part numbers exactly `1..=n`
fn ensure_contiguous(parts: &[PartResult], expected_count: Option<u32>) -> Result<()> {
    if parts.is_empty() {
        return Err(UploadError::Internal("no parts to finalize".to_string()));
    }
    for (index, part) in parts.iter().enumerate() {
        if part.part_number != index as u32 + 1 {
            return Err(UploadError::Internal(format!(
                "part {} missing before finalize",
                index + 1
            )));
        }
    }
    if let Some(count) = expected_count {
        if parts.len() != count as usize {
            return Err(UploadError::Internal(format!(
                "expected {} parts before finalize, have {}",
                count,
                parts.len()
            )));
        }
    }
    Ok(())
}

/// Cloneable handle to pause, resume or cancel a job
#[derive(Clone)]
pub struct UploadControl {
    job: Arc<Job>,
}

impl UploadControl {
    /// Abort in-flight requests while keeping completed parts. A no-op when
    /// nothing is in flight.
    pub fn pause(&self) -> Result<()> {
        self.job.pause()
    }

    /// Start a new attempt after `pause()` or a failure
    pub fn resume(&self) -> Result<()> {
        self.job.begin(ControlAction::Resume)
    }

    /// Abort the job for good and reject its result with `UploadError::Canceled`
    pub fn cancel(&self) -> Result<()> {
        self.job.cancel(None)
    }

    pub fn cancel_with_reason(&self, reason: impl Into<String>) -> Result<()> {
        self.job.cancel(Some(reason.into()))
    }

    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    /// Snapshot of the session and parts completed so far
    pub fn in_progress(&self) -> Option<InProgressUpload> {
        self.job.in_progress()
    }

    /// Bytes reported as transferred so far
    pub fn loaded(&self) -> u64 {
        self.job.loaded()
    }
}

/// A running upload job
pub struct UploadTask {
    control: UploadControl,
    outcomes: mpsc::UnboundedReceiver<Result<UploadedObject>>,
}

impl UploadTask {
    pub(crate) fn new(
        job: Arc<Job>,
        outcomes: mpsc::UnboundedReceiver<Result<UploadedObject>>,
    ) -> Self {
        UploadTask {
            control: UploadControl { job },
            outcomes,
        }
    }

    pub fn control(&self) -> UploadControl {
        self.control.clone()
    }

    pub fn pause(&self) -> Result<()> {
        self.control.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.control.resume()
    }

    pub fn cancel(&self) -> Result<()> {
        self.control.cancel()
    }

    pub fn cancel_with_reason(&self, reason: impl Into<String>) -> Result<()> {
        self.control.cancel_with_reason(reason)
    }

    pub fn status(&self) -> JobStatus {
        self.control.status()
    }

    /// Wait for the job's next outcome: the uploaded object, a failure, or
    /// the cancellation error. Stays pending while the job is paused.
    pub async fn result(&mut self) -> Result<UploadedObject> {
        match self.outcomes.recv().await {
            Some(outcome) => outcome,
            None => Err(UploadError::Internal("upload job dropped".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_contiguous() {
        let parts = vec![PartResult::new(1, "a"), PartResult::new(2, "b")];
        assert!(ensure_contiguous(&parts, Some(2)).is_ok());
        assert!(ensure_contiguous(&parts, None).is_ok());
        assert!(ensure_contiguous(&parts, Some(3)).is_err());

        let gap = vec![PartResult::new(1, "a"), PartResult::new(3, "c")];
        assert!(ensure_contiguous(&gap, None).is_err());
        assert!(ensure_contiguous(&[], None).is_err());
    }
}
