use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, warn};

use crate::job_query::JobQuery;
use crate::job_status::JobState;
use crate::response_handler::ERR_CODE_CORRUPT;
use crate::session_service::{ErrInfo, RespInfo, SessionCallback, SessionChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishState {
    Active,
    Error,
    Finished,
}

struct RequestState {
    finish: FinishState,
    cancelled: bool,
}

/// One wire attempt of one job.
///
/// Receives the session service's callbacks, feeds bytes to the job's
/// response handler, and owns the finish/retry/cancel bookkeeping of the
/// attempt. The back reference to the job is non-owning; it is promoted
/// only for the duration of a callback and dropped on cleanup so the
/// request can die once the attempt is over.
pub struct QueryRequest {
    job: Mutex<Option<Weak<JobQuery>>>,
    channel: Mutex<Option<Arc<dyn SessionChannel>>>,
    state: Mutex<RequestState>,
    retried: AtomicBool,
    called_mark_complete: AtomicBool,
    large_result: AtomicBool,
    id_str: String,
}

impl QueryRequest {
    /// Create the attempt object for `job`.
    pub fn new(job: &Arc<JobQuery>) -> Arc<Self> {
        Arc::new(Self {
            id_str: job.id_str().to_string(),
            job: Mutex::new(Some(Arc::downgrade(job))),
            channel: Mutex::new(None),
            state: Mutex::new(RequestState {
                finish: FinishState::Active,
                cancelled: false,
            }),
            retried: AtomicBool::new(false),
            called_mark_complete: AtomicBool::new(false),
            large_result: AtomicBool::new(false),
        })
    }

    /// Install the provisioned channel so cancellation can be delegated.
    pub fn set_channel(&self, channel: Arc<dyn SessionChannel>) {
        *self.channel.lock().expect("channel lock") = Some(channel);
    }

    fn job(&self) -> Option<Arc<JobQuery>> {
        self.job
            .lock()
            .expect("job lock")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Whether the worker flagged this response as large.
    pub fn is_large_result(&self) -> bool {
        self.large_result.load(Ordering::Acquire)
    }

    /// Cancel this attempt. Only the first caller does work; if a network
    /// request is in flight its cancellation is delegated to the channel.
    pub fn cancel(&self) {
        {
            let mut st = self.state.lock().expect("state lock");
            if st.cancelled {
                debug!("{} request cancel: already cancelled", self.id_str);
                return;
            }
            st.cancelled = true;
            self.retried.store(true, Ordering::Release);
            if st.finish == FinishState::Active {
                if let Some(jq) = self.job() {
                    jq.status().update(JobState::Cancelled);
                }
            }
        }
        if let Some(channel) = self.channel.lock().expect("channel lock").clone() {
            tokio::spawn(async move {
                channel.cancel().await;
            });
        }
        self.error_finish(true);
    }

    /// Whether cancel() ran on this attempt.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().expect("state lock").cancelled
    }

    // Finalize under error conditions; retries the job or reports
    // completion. Only the first of finish/error_finish takes effect.
    fn error_finish(&self, should_cancel: bool) {
        let jq = self.job();
        {
            let mut st = self.state.lock().expect("state lock");
            if st.finish != FinishState::Active || jq.is_none() {
                debug!("{} error_finish: not active, ignoring", self.id_str);
                return;
            }
            st.finish = FinishState::Error;
        }
        let jq = jq.expect("checked above");
        if !self.retried.swap(true, Ordering::AcqRel) && !should_cancel {
            debug!("{} error_finish: scheduling retry", self.id_str);
            jq.schedule_retry();
        } else {
            self.call_mark_complete(&jq, false);
        }
        self.cleanup();
    }

    // Finalize under success conditions.
    fn finish(&self) {
        {
            let mut st = self.state.lock().expect("state lock");
            if st.finish != FinishState::Active {
                warn!("{} finish: not active, ignoring", self.id_str);
                return;
            }
            st.finish = FinishState::Finished;
        }
        if let Some(jq) = self.job() {
            self.call_mark_complete(&jq, true);
        }
        self.cleanup();
    }

    // Inform the executive exactly once.
    fn call_mark_complete(&self, jq: &Arc<JobQuery>, success: bool) {
        if !self.called_mark_complete.swap(true, Ordering::AcqRel) {
            jq.notify_executive_completed(success);
        }
    }

    // Drop back references so the attempt can be reclaimed.
    fn cleanup(&self) {
        *self.job.lock().expect("job lock") = None;
        *self.channel.lock().expect("channel lock") = None;
    }
}

impl SessionCallback for QueryRequest {
    fn process_response(&self, err: Option<ErrInfo>, resp: RespInfo) {
        let Some(jq) = self.job() else {
            return;
        };
        if jq.is_query_cancelled() {
            warn!("{} response for cancelled query", self.id_str);
            self.cancel();
            return;
        }
        {
            let st = self.state.lock().expect("state lock");
            if st.finish != FinishState::Active {
                return;
            }
        }
        if let Some(e) = err {
            error!("{} request failed: {} ({})", self.id_str, e.msg, e.code);
            jq.description()
                .handler()
                .error_flush(&format!("{} request failed: {}", self.id_str, e.msg), e.code);
            jq.status()
                .update_info(JobState::ResponseError, e.code, &e.msg);
            self.error_finish(false);
            return;
        }
        match resp {
            RespInfo::Error { code, msg } => {
                jq.status().update_info(JobState::ResponseError, code, &msg);
                jq.description()
                    .handler()
                    .error_flush(&format!("{} worker error: {msg}", self.id_str), code);
                // A worker-reported error is terminal, unlike a transport
                // failure.
                self.retried.store(true, Ordering::Release);
                self.error_finish(false);
            }
            RespInfo::Stream => {
                jq.status().update(JobState::ResponseReady);
            }
        }
    }

    fn process_response_data(&self, err: Option<ErrInfo>, bytes: &[u8], last: bool) {
        let Some(jq) = self.job() else {
            debug!("{} data for inactive request", self.id_str);
            return;
        };
        {
            let st = self.state.lock().expect("state lock");
            if st.finish != FinishState::Active {
                return;
            }
        }
        if let Some(e) = err {
            jq.status()
                .update_info(JobState::ResponseDataNack, e.code, &e.msg);
            error!("{} response data error ({} {})", self.id_str, e.code, e.msg);
            jq.description().handler().error_flush(
                &format!("couldn't retrieve response data: {} {}", e.msg, self.id_str),
                e.code,
            );
            self.error_finish(false);
            return;
        }

        jq.status().update(JobState::ResponseData);
        let handler = Arc::clone(jq.description().handler());
        {
            let buf = handler.next_buffer();
            let mut buf = buf.lock().expect("buffer lock");
            buf.clear();
            buf.extend_from_slice(bytes);
        }
        let mut large_result = false;
        let flush_ok = handler.flush(bytes.len(), last, &mut large_result);
        if large_result && !self.large_result.swap(true, Ordering::AcqRel) {
            // Once the worker indicates a large result, it stays that way.
            debug!("{} large result", self.id_str);
        }

        if flush_ok {
            if last {
                jq.status().update(JobState::Complete);
                self.finish();
            }
            // Not last: the service keeps delivering blocks.
            return;
        }

        let herr = handler.get_error();
        let (state, code, msg) = match &herr {
            Some(e) if e.code == ERR_CODE_CORRUPT => {
                (JobState::ResponseDataErrorCorrupt, e.code, e.msg.clone())
            }
            Some(e) => (JobState::MergeError, e.code, e.msg.clone()),
            None => (JobState::MergeError, -1, "merge refused data".to_string()),
        };
        error!("{} flush failed: {msg}", self.id_str);
        jq.status().update_info(state, code, &msg);
        // Merge refusals and protocol violations are terminal for the job.
        self.retried.store(true, Ordering::Release);
        self.error_finish(false);
    }
}
