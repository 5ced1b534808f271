use std::fmt;
use std::sync::Arc;

use sks_analysis::TaskMsg;
use sks_common::{JobId, ResourceUnit, Result};

use crate::response_handler::ResponseHandler;

/// Immutable description of one per-chunk job: which worker resource to
/// bind, what payload to run, and where result bytes go.
#[derive(Clone)]
pub struct JobDescription {
    job_id: JobId,
    resource: ResourceUnit,
    payload: Vec<u8>,
    handler: Arc<dyn ResponseHandler>,
    max_attempts: u32,
}

impl JobDescription {
    /// Build a description.
    pub fn new(
        job_id: JobId,
        resource: ResourceUnit,
        payload: Vec<u8>,
        handler: Arc<dyn ResponseHandler>,
        max_attempts: u32,
    ) -> Self {
        Self {
            job_id,
            resource,
            payload,
            handler,
            max_attempts,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn resource(&self) -> &ResourceUnit {
        &self.resource
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn handler(&self) -> &Arc<dyn ResponseHandler> {
        &self.handler
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Structural verification of the payload before an attempt is posted.
    pub fn verify_payload(&self) -> Result<()> {
        TaskMsg::deserialize(&self.payload)?.verify()
    }
}

impl fmt::Debug for JobDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescription")
            .field("job_id", &self.job_id)
            .field("resource", &self.resource)
            .field("payload_len", &self.payload.len())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
