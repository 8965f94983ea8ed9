//! Upload job lifecycle

/// Lifecycle status of an upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Idle,
    Uploading,
    Paused,
    /// An attempt failed; the outcome was delivered but the job can be resumed
    Failed,
    Completed,
    Canceled,
}

impl JobStatus {
    /// Completed and canceled jobs accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Idle => "idle",
            JobStatus::Uploading => "uploading",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
            JobStatus::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

/// Events that move a job between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Cancel,
    Complete,
    Fail,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlAction::Start => "start",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Cancel => "cancel",
            ControlAction::Complete => "complete",
            ControlAction::Fail => "fail",
        };
        write!(f, "{}", name)
    }
}

/// The status `action` leads to from `from`, or `None` if the transition is not allowed.
///
/// `Paused → Completed` covers an attempt that finished its last remote call
/// just as the pause arrived.
pub fn transition(from: JobStatus, action: ControlAction) -> Option<JobStatus> {
    use ControlAction::*;
    use JobStatus::*;

    match (from, action) {
        (Idle, Start) => Some(Uploading),
        (Uploading, Pause) => Some(Paused),
        (Paused | Failed, Resume) => Some(Uploading),
        (Idle | Uploading | Paused | Failed, Cancel) => Some(Canceled),
        (Uploading | Paused, Complete) => Some(Completed),
        (Uploading, Fail) => Some(Failed),
        _ => None,
    }
}
