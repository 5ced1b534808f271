use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sks_common::metrics::global_metrics;
use sks_common::{ExecutiveConfig, JobId, MultiError, QueryId, Result, SksError};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::job_description::JobDescription;
use crate::job_query::JobQuery;
use crate::message_store::{MessageSeverity, MessageStore};
use crate::mock::MockSessionService;
use crate::query_request::QueryRequest;
use crate::session_service::SessionService;

/// Manages the execution of all per-chunk jobs of one user query.
///
/// Owns the job registry and the bounded start pool; tracks completion;
/// accumulates job failures into one multi-error; and carries the latched
/// user-query cancellation ("squash").
pub struct Executive {
    config: ExecutiveConfig,
    service: Arc<dyn SessionService>,
    message_store: Arc<MessageStore>,
    query_id: Mutex<QueryId>,

    job_map: Mutex<HashMap<JobId, Arc<JobQuery>>>,
    incomplete_jobs: Mutex<HashMap<JobId, Arc<JobQuery>>>,
    empty: AtomicBool,
    multi_error: Mutex<MultiError>,
    cancelled: AtomicBool,
    request_count: AtomicU64,

    start_pool: Arc<Semaphore>,
    start_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Executive {
    /// Create an executive from config. `"Mock"` as the service URL selects
    /// the in-process mock session service; any other URL requires a
    /// transport supplied through [`Executive::with_service`].
    pub fn new(config: ExecutiveConfig, message_store: Arc<MessageStore>) -> Result<Arc<Self>> {
        if !config.is_mock() {
            return Err(SksError::Config(format!(
                "no built-in transport for service url '{}'; \
                 supply one via Executive::with_service",
                config.service_url
            )));
        }
        let service = Arc::new(MockSessionService::new());
        Ok(Self::with_service(config, service, message_store))
    }

    /// Create an executive over a caller-supplied session service.
    pub fn with_service(
        config: ExecutiveConfig,
        service: Arc<dyn SessionService>,
        message_store: Arc<MessageStore>,
    ) -> Arc<Self> {
        let (done_tx, done_rx) = watch::channel(true);
        let width = config.start_pool_width.max(1);
        Arc::new(Self {
            config,
            service,
            message_store,
            query_id: Mutex::new(QueryId(0)),
            job_map: Mutex::new(HashMap::new()),
            incomplete_jobs: Mutex::new(HashMap::new()),
            empty: AtomicBool::new(true),
            multi_error: Mutex::new(MultiError::new()),
            cancelled: AtomicBool::new(false),
            request_count: AtomicU64::new(0),
            start_pool: Arc::new(Semaphore::new(width)),
            start_handles: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
        })
    }

    /// Executive configuration.
    pub fn config(&self) -> &ExecutiveConfig {
        &self.config
    }

    /// Per-query diagnostics log.
    pub fn message_store(&self) -> &Arc<MessageStore> {
        &self.message_store
    }

    /// Set the user-query id once it is known.
    pub fn set_query_id(&self, id: QueryId) {
        *self.query_id.lock().expect("id lock") = id;
    }

    /// The user-query id.
    pub fn query_id(&self) -> QueryId {
        *self.query_id.lock().expect("id lock")
    }

    /// Whether squash() latched.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether no jobs are outstanding.
    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Acquire)
    }

    /// Jobs submitted so far.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Acquire)
    }

    /// Add one job and enqueue its start on the bounded start pool.
    ///
    /// Not thread-safe with respect to other `add` calls; the caller
    /// serializes adds. Fails fast once the query was squashed.
    pub fn add(self: &Arc<Self>, description: JobDescription) -> Result<Arc<JobQuery>> {
        if self.is_cancelled() {
            return Err(SksError::Analysis(format!(
                "query cancelled, rejecting job {}",
                description.job_id()
            )));
        }
        let job_id = description.job_id();
        let job = JobQuery::new(self, description, self.query_id());

        {
            let mut jobs = self.job_map.lock().expect("job map lock");
            if jobs.contains_key(&job_id) {
                return Err(SksError::Bug(format!("duplicate job id {job_id}")));
            }
            jobs.insert(job_id, Arc::clone(&job));
        }
        {
            let mut incomplete = self.incomplete_jobs.lock().expect("incomplete lock");
            incomplete.insert(job_id, Arc::clone(&job));
            self.empty.store(false, Ordering::Release);
            let _ = self.done_tx.send(false);
            global_metrics().set_jobs_inflight(&self.query_id().to_string(), incomplete.len() as i64);
        }
        self.request_count.fetch_add(1, Ordering::AcqRel);

        let exec = Arc::clone(self);
        let pool = Arc::clone(&self.start_pool);
        let start_job = Arc::clone(&job);
        let handle = tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.expect("start pool closed");
            if exec.is_cancelled() {
                // squash() cancels queued jobs; nothing to start.
                return;
            }
            if !start_job.run_job().await && !start_job.is_cancelled() && !exec.is_cancelled() {
                exec.mark_completed(start_job.job_id(), false);
            }
        });
        self.start_handles.lock().expect("handle lock").push(handle);
        debug!(job = %job_id, "job added");
        Ok(job)
    }

    /// Wait for every enqueued start task to have run. Call only after all
    /// jobs were added.
    pub async fn wait_for_all_jobs_to_start(&self) {
        let handles: Vec<_> = self
            .start_handles
            .lock()
            .expect("handle lock")
            .drain(..)
            .collect();
        for h in handles {
            let _ = h.await;
        }
    }

    /// Look up one job.
    pub fn job_query(&self, job_id: JobId) -> Option<Arc<JobQuery>> {
        self.job_map.lock().expect("job map lock").get(&job_id).cloned()
    }

    /// Jobs not yet terminal.
    pub fn num_inflight(&self) -> usize {
        self.incomplete_jobs.lock().expect("incomplete lock").len()
    }

    /// Human-readable execution progress.
    pub fn progress_desc(&self) -> String {
        let total = self.request_count();
        let inflight = self.num_inflight();
        let errors = self.multi_error.lock().expect("error lock").len();
        format!(
            "{}/{} jobs complete, {} in flight, {} errors{}",
            total as usize - inflight,
            total,
            inflight,
            errors,
            if self.is_cancelled() { ", cancelled" } else { "" }
        )
    }

    /// Rendered multi-error diagnostic.
    pub fn error_desc(&self) -> String {
        self.multi_error.lock().expect("error lock").to_string()
    }

    /// Block until every added job is terminal.
    ///
    /// Returns true iff all jobs succeeded and the query was not squashed.
    pub async fn join(&self) -> bool {
        let mut rx = self.done_rx.clone();
        loop {
            if self.num_inflight() == 0 {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.empty.store(true, Ordering::Release);
        let ok = !self.is_cancelled() && self.multi_error.lock().expect("error lock").is_empty();
        info!(success = ok, "{}", self.progress_desc());
        ok
    }

    /// Notification that a job reached a terminal state. Removes it from
    /// the incomplete set, records failures, and wakes `join()` when the
    /// set drains. Idempotent per job.
    pub fn mark_completed(&self, job_id: JobId, success: bool) {
        let job = {
            let mut incomplete = self.incomplete_jobs.lock().expect("incomplete lock");
            let job = incomplete.remove(&job_id);
            global_metrics()
                .set_jobs_inflight(&self.query_id().to_string(), incomplete.len() as i64);
            job
        };
        let Some(job) = job else {
            // Already terminal (e.g. cancel raced a completion).
            return;
        };
        debug!("{} markCompleted success={success}", job.id_str());
        global_metrics().record_job_completed(&self.query_id().to_string(), success);
        // Cancellation (direct or via squash) is never reported as failure.
        if !success && !job.is_cancelled() && !self.is_cancelled() {
            let info = job.status().info();
            let msg = format!(
                "job {} failed in state {}: {}",
                job_id, info.state, info.state_desc
            );
            self.multi_error
                .lock()
                .expect("error lock")
                .push(info.state_code, msg.clone());
            self.message_store
                .add(-1, info.state_code, msg, MessageSeverity::Error);
        }
        let drained = self.incomplete_jobs.lock().expect("incomplete lock").is_empty();
        if drained {
            self.empty.store(true, Ordering::Release);
            let _ = self.done_tx.send(true);
        }
    }

    /// Squash the user query: latch cancellation and cancel every
    /// incomplete job. Idempotent; a squash after join is a no-op.
    pub async fn squash(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("squash: already cancelled");
            return;
        }
        warn!("squashing user query {}", self.query_id());
        let snapshot: Vec<Arc<JobQuery>> = self
            .incomplete_jobs
            .lock()
            .expect("incomplete lock")
            .values()
            .cloned()
            .collect();
        for job in snapshot {
            job.cancel().await;
        }
    }

    /// Provision `resource` and submit the job payload, atomically with
    /// respect to `squash()`: a query cancelled at the provisioning
    /// handoff never submits.
    pub(crate) async fn start_query(
        &self,
        job: &Arc<JobQuery>,
        request: Arc<QueryRequest>,
    ) -> Result<()> {
        let channel = self.service.provision(job.description().resource()).await?;
        if self.is_cancelled() {
            return Err(SksError::Transport(
                "executive cancelled at provisioning handoff".into(),
            ));
        }
        request.set_channel(Arc::clone(&channel));
        channel
            .process(job.description().payload().to_vec(), request)
            .await
    }
}

impl std::fmt::Debug for Executive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executive")
            .field("query_id", &self.query_id())
            .field("jobs", &self.request_count())
            .field("inflight", &self.num_inflight())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
