use serde::{Deserialize, Serialize};

/// Service URL value that selects the in-process mock session service.
pub const MOCK_SERVICE_URL: &str = "Mock";

/// Executive behavior/configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveConfig {
    /// Session-service endpoint. [`MOCK_SERVICE_URL`] selects the in-process mock.
    pub service_url: String,
    /// Width of the bounded pool used to start jobs.
    pub start_pool_width: usize,
    /// Max attempts before a job is considered terminally failed and the
    /// user query is squashed.
    pub max_attempts: u32,
    /// Seconds a failed attempt sleeps before it is re-run.
    pub attempt_sleep_seconds: u64,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            service_url: MOCK_SERVICE_URL.to_string(),
            start_pool_width: 10,
            max_attempts: 5,
            attempt_sleep_seconds: 30,
        }
    }
}

impl ExecutiveConfig {
    /// Returns whether the in-process mock session service is selected.
    pub fn is_mock(&self) -> bool {
        self.service_url == MOCK_SERVICE_URL
    }
}

/// Replica controller behavior/configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Interval between status polls of a queued/in-progress worker request.
    pub timer_ival_seconds: u64,
    /// Seconds a request waits before replaying its current protocol step
    /// after a transport failure.
    pub restart_delay_seconds: u64,
    /// Maximum restarts of one request before it is failed as a client error.
    pub max_restarts: u32,
    /// Maximum accepted response frame size in bytes.
    pub max_frame_bytes: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timer_ival_seconds: 1,
            restart_delay_seconds: 1,
            max_restarts: 10,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}
