use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

/// Lifecycle states of one per-chunk job.
///
/// Transitions are monotonic except for the retry path
/// `ProvisionNack -> Provision`. Terminal states: `ResponseError`,
/// `ResponseDataNack`, `ResponseDataErrorCorrupt`, `MergeError`,
/// `Complete`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Constructed, not yet run.
    Created,
    /// Binding the job to a session resource.
    Provision,
    /// Provisioning refused; a retry will re-enter `Provision`.
    ProvisionNack,
    /// Request handed to the session service.
    RequestSent,
    /// Worker signalled a streamed response.
    ResponseReady,
    /// Streaming result buffers.
    ResponseData,
    /// Worker answered with an error response.
    ResponseError,
    /// The service failed while delivering response data.
    ResponseDataNack,
    /// A response frame violated the result protocol.
    ResponseDataErrorCorrupt,
    /// The merger refused a flushed buffer.
    MergeError,
    /// All buffers merged.
    Complete,
    /// Cancelled by squash or explicit cancel.
    Cancelled,
}

impl JobState {
    /// Whether this state ends the job.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::ResponseError
                | JobState::ResponseDataNack
                | JobState::ResponseDataErrorCorrupt
                | JobState::MergeError
                | JobState::Complete
                | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One timestamped state report.
#[derive(Debug, Clone)]
pub struct JobStatusInfo {
    /// Current state.
    pub state: JobState,
    /// When the state was reported.
    pub state_time: SystemTime,
    /// Code associated with the state (worker or session error code).
    pub state_code: i32,
    /// Textual description.
    pub state_desc: String,
}

/// Monitors execution of one chunk query. Receives timestamped state
/// reports so a manager object can observe progress without exposing
/// itself to the reporting side.
#[derive(Debug)]
pub struct JobStatus {
    info: Mutex<JobStatusInfo>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStatus {
    /// A fresh status in `Created`.
    pub fn new() -> Self {
        Self {
            info: Mutex::new(JobStatusInfo {
                state: JobState::Created,
                state_time: SystemTime::now(),
                state_code: 0,
                state_desc: String::new(),
            }),
        }
    }

    /// Report a state transition.
    pub fn update(&self, state: JobState) {
        self.update_info(state, 0, "");
    }

    /// Report a state transition with a code and description.
    pub fn update_info(&self, state: JobState, code: i32, desc: &str) {
        let mut info = self.info.lock().expect("status lock");
        info.state = state;
        info.state_time = SystemTime::now();
        info.state_code = code;
        info.state_desc = desc.to_string();
    }

    /// Snapshot the current report.
    pub fn info(&self) -> JobStatusInfo {
        self.info.lock().expect("status lock").clone()
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.info.lock().expect("status lock").state
    }
}
