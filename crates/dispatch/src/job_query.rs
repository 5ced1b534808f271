use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use sks_common::metrics::global_metrics;
use sks_common::{JobId, QueryId, query_id_str};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::executive::Executive;
use crate::job_description::JobDescription;
use crate::job_status::{JobState, JobStatus};
use crate::query_request::QueryRequest;

/// One per-chunk job of one user query.
///
/// Owns its in-flight request attempt; holds a non-owning back reference
/// to the executive. The per-job mutex over the in-flight attempt
/// serializes retry-vs-cancel races; the cancel flag is a single-shot
/// latch.
pub struct JobQuery {
    executive: Weak<Executive>,
    description: JobDescription,
    status: Arc<JobStatus>,
    qid: QueryId,
    attempts: AtomicU32,
    cancelled: AtomicBool,
    in_flight: Mutex<Option<Arc<QueryRequest>>>,
    id_str: String,
}

impl JobQuery {
    /// Create a job bound to `executive`.
    pub fn new(executive: &Arc<Executive>, description: JobDescription, qid: QueryId) -> Arc<Self> {
        let id_str = query_id_str(qid, Some(description.job_id()));
        debug!("{} new JobQuery payload={}B", id_str, description.payload().len());
        Arc::new(Self {
            executive: Arc::downgrade(executive),
            description,
            status: Arc::new(JobStatus::new()),
            qid,
            attempts: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            in_flight: Mutex::new(None),
            id_str,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.description.job_id()
    }

    pub fn query_id(&self) -> QueryId {
        self.qid
    }

    pub fn description(&self) -> &JobDescription {
        &self.description
    }

    pub fn status(&self) -> &Arc<JobStatus> {
        &self.status
    }

    /// Log-correlation prefix for this job.
    pub fn id_str(&self) -> &str {
        &self.id_str
    }

    /// Attempts posted so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Whether this job's cancel latch fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether this job or its whole user query was cancelled. When the
    /// executive is already gone, the worst is assumed.
    pub fn is_query_cancelled(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.executive.upgrade() {
            Some(exec) => exec.is_cancelled(),
            None => {
                warn!("{} executive gone, treating as cancelled", self.id_str);
                true
            }
        }
    }

    /// Attempt to run the job on a worker.
    ///
    /// Fails fast when the user query was cancelled or the response
    /// handler refuses to reset. The attempt counter is incremented (and
    /// partial results scrubbed) strictly before the new attempt is
    /// posted; structural failures escalate to a squash of the user query.
    ///
    /// Returns false when no attempt (and no retry) was left behind.
    pub async fn run_job(self: &Arc<Self>) -> bool {
        debug!("{} run_job", self.id_str);
        let Some(exec) = self.executive.upgrade() else {
            error!("{} run_job failed: executive gone", self.id_str);
            return false;
        };
        let cancelled = exec.is_cancelled() || self.is_cancelled();
        let handler_reset = self.description.handler().reset();
        if cancelled || !handler_reset {
            warn!(
                "{} run_job refused cancelled={cancelled} reset={handler_reset}",
                self.id_str
            );
            return false;
        }

        let mut in_flight = self.in_flight.lock().await;
        let attempt = self.attempts.load(Ordering::Acquire);
        if attempt >= self.description.max_attempts() {
            error!(
                "{} hit maximum number of attempts ({attempt}), squashing user query",
                self.id_str
            );
            drop(in_flight);
            exec.squash().await;
            return false;
        }
        self.attempts.store(attempt + 1, Ordering::Release);

        if !self
            .description
            .handler()
            .prep_scrub_results(self.job_id(), attempt + 1)
        {
            error!("{} could not scrub previous attempt, squashing", self.id_str);
            drop(in_flight);
            exec.squash().await;
            return false;
        }
        if let Err(e) = self.description.verify_payload() {
            error!("{} payload verification failed: {e}, squashing", self.id_str);
            drop(in_flight);
            exec.squash().await;
            return false;
        }

        self.status.update(JobState::Provision);
        global_metrics().record_job_started(&self.qid.to_string());
        let request = QueryRequest::new(self);
        *in_flight = Some(Arc::clone(&request));
        drop(in_flight);

        match exec.start_query(self, request).await {
            Ok(()) => {
                self.status.update(JobState::RequestSent);
                true
            }
            Err(e) => {
                self.status
                    .update_info(JobState::ProvisionNack, -1, &e.to_string());
                *self.in_flight.lock().await = None;
                if exec.is_cancelled() || self.is_cancelled() {
                    debug!("{} provisioning aborted by cancellation", self.id_str);
                    return false;
                }
                warn!("{} provisioning refused: {e}, will retry", self.id_str);
                self.schedule_retry();
                true
            }
        }
    }

    /// Retry this job after the configured backoff, on a detached task
    /// holding no job lock. The retry re-checks cancellation after the
    /// sleep and exits without running a squashed job.
    pub fn schedule_retry(self: &Arc<Self>) {
        let Some(exec) = self.executive.upgrade() else {
            return;
        };
        let sleep = Duration::from_secs(exec.config().attempt_sleep_seconds);
        let job = Arc::clone(self);
        global_metrics().record_job_retried(&self.qid.to_string());
        self.status.update(JobState::ProvisionNack);
        tokio::spawn(async move {
            tokio::time::sleep(sleep).await;
            let Some(exec) = job.executive.upgrade() else {
                return;
            };
            if job.is_cancelled() || exec.is_cancelled() {
                debug!("{} retry woke into cancelled query", job.id_str);
                exec.mark_completed(job.job_id(), false);
                return;
            }
            if !job.run_job().await && !job.is_cancelled() && !exec.is_cancelled() {
                exec.mark_completed(job.job_id(), false);
            }
        });
    }

    /// Cancel this job. A latch: only the first caller does work, and the
    /// handler's cancel hook runs exactly once. Returns true for that
    /// first caller.
    pub async fn cancel(self: &Arc<Self>) -> bool {
        debug!("{} JobQuery::cancel", self.id_str);
        if self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("{} cancel: already cancelled", self.id_str);
            return false;
        }
        {
            let in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(request) => {
                    // The attempt owns its own terminal bookkeeping.
                    request.cancel();
                }
                None => {
                    drop(in_flight);
                    self.status.update(JobState::Cancelled);
                    self.description
                        .handler()
                        .error_flush(&format!("{} cancelled before request", self.id_str), -1);
                    if let Some(exec) = self.executive.upgrade() {
                        exec.mark_completed(self.job_id(), false);
                    } else {
                        error!("{} cancel: executive gone", self.id_str);
                    }
                }
            }
        }
        self.description.handler().process_cancel();
        global_metrics().record_job_cancelled(&self.qid.to_string());
        true
    }

    /// Terminal handoff from the attempt to the executive.
    pub(crate) fn notify_executive_completed(&self, success: bool) {
        if let Some(exec) = self.executive.upgrade() {
            exec.mark_completed(self.job_id(), success);
        }
    }
}

impl fmt::Debug for JobQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQuery")
            .field("id", &self.id_str)
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
