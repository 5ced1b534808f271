use std::sync::Arc;

use async_trait::async_trait;

use sks_common::{ResourceUnit, Result};

/// Error text and code pair reported by the session service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrInfo {
    /// Description.
    pub msg: String,
    /// Service or worker error code.
    pub code: i32,
}

/// Response descriptor delivered with the first callback of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespInfo {
    /// The worker streams result data; data callbacks follow.
    Stream,
    /// The worker answered with an error instead of data.
    Error {
        /// Worker error code.
        code: i32,
        /// Worker error message.
        msg: String,
    },
}

/// Callbacks a submitted request receives from the session service. The
/// core treats everything but the type tag and the error pair as opaque.
pub trait SessionCallback: Send + Sync {
    /// First response for the request.
    fn process_response(&self, err: Option<ErrInfo>, resp: RespInfo);

    /// One block of streamed response data. `last` marks the final block.
    /// `err` reports a delivery failure; `bytes` is empty in that case.
    fn process_response_data(&self, err: Option<ErrInfo>, bytes: &[u8], last: bool);
}

/// One provisioned session to a worker resource.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Submit a request payload. The service drives `callback` from its own
    /// tasks; `process` returns once the request is accepted.
    async fn process(&self, payload: Vec<u8>, callback: Arc<dyn SessionCallback>) -> Result<()>;

    /// Ask the service to cancel the in-flight request. Best effort; the
    /// caller still owns its own terminal bookkeeping.
    async fn cancel(&self);
}

/// The pluggable request/response transport used to reach workers.
///
/// Out-of-process implementations live outside the core; the in-process
/// mock ([`crate::mock::MockSessionService`]) is selected by the `"Mock"`
/// service URL.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Bind `resource` to a session. Provisioning may be refused; callers
    /// treat that as retriable.
    async fn provision(&self, resource: &ResourceUnit) -> Result<Arc<dyn SessionChannel>>;
}
