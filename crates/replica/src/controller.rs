use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use sks_common::metrics::global_metrics;
use sks_common::{ControllerConfig, Result, SksError};

use crate::messages::{ServiceAction, TargetKind};
use crate::request::{ReplicaRequest, RequestKind};

/// Callback invoked once a request reaches a terminal state. It runs after
/// the request left the registry and outside the registry lock, so it may
/// call back into the controller API.
pub type OnFinish = Box<dyn FnOnce(Arc<ReplicaRequest>) + Send + 'static>;

struct RequestWrapper {
    request: Arc<ReplicaRequest>,
    on_finish: Option<OnFinish>,
}

/// The replica control plane's front end.
///
/// Each create-style method asserts the controller is running, constructs a
/// typed request, registers it in the registry under one mutex, and starts
/// it. A finished request is removed from the registry first and its user
/// callback is notified after, with no lock held.
pub struct Controller {
    config: ControllerConfig,
    workers: Mutex<HashMap<String, String>>,
    registry: Mutex<HashMap<String, RequestWrapper>>,
    running: AtomicBool,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Controller {
    /// Create a stopped controller; call [`Controller::run`] before
    /// submitting requests.
    pub fn new(config: ControllerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            workers: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register a worker's replication-agent address.
    pub fn add_worker(&self, name: impl Into<String>, addr: impl Into<String>) {
        self.workers
            .lock()
            .expect("worker lock")
            .insert(name.into(), addr.into());
    }

    /// Start accepting requests.
    pub fn run(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Whether the controller accepts requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the controller: refuse new requests, wait for outstanding
    /// request tasks (the caller drains them first), then verify the
    /// registry is empty. A non-empty registry is a programming error.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let handles: Vec<_> = self.tasks.lock().expect("task lock").drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
        if !self.registry.lock().expect("registry lock").is_empty() {
            return Err(SksError::Bug(
                "controller stopped with outstanding requests in the registry".into(),
            ));
        }
        Ok(())
    }

    /// Requests currently in the registry.
    pub fn num_active(&self) -> usize {
        self.registry.lock().expect("registry lock").len()
    }

    /// Snapshot of the active requests.
    pub fn active_requests(&self) -> Vec<Arc<ReplicaRequest>> {
        self.registry
            .lock()
            .expect("registry lock")
            .values()
            .map(|w| Arc::clone(&w.request))
            .collect()
    }

    /// Whether `id` is still active.
    pub fn is_active(&self, id: &str) -> bool {
        self.registry.lock().expect("registry lock").contains_key(id)
    }

    // ── Create methods ──────────────────────────────────────────────────

    /// Replicate `chunk` of `database` onto `worker` from `source_worker`.
    pub fn replicate(
        self: &Arc<Self>,
        worker: &str,
        source_worker: &str,
        database: &str,
        chunk: u32,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::Replicate {
                database: database.to_string(),
                chunk,
                source_worker: source_worker.to_string(),
            },
            true,
            on_finish,
        )
    }

    /// Delete the replica of `chunk` of `database` on `worker`.
    pub fn delete_replica(
        self: &Arc<Self>,
        worker: &str,
        database: &str,
        chunk: u32,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::Delete {
                database: database.to_string(),
                chunk,
            },
            true,
            on_finish,
        )
    }

    /// Find the replica of `chunk` of `database` on `worker`.
    pub fn find_replica(
        self: &Arc<Self>,
        worker: &str,
        database: &str,
        chunk: u32,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::Find {
                database: database.to_string(),
                chunk,
            },
            true,
            on_finish,
        )
    }

    /// Enumerate all replicas of `database` on `worker`.
    pub fn find_all_replicas(
        self: &Arc<Self>,
        worker: &str,
        database: &str,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::FindAll {
                database: database.to_string(),
            },
            true,
            on_finish,
        )
    }

    /// Stop the earlier request `target_id` of kind `target` on `worker`.
    pub fn stop_request(
        self: &Arc<Self>,
        worker: &str,
        target: TargetKind,
        target_id: &str,
        keep_tracking: bool,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::Stop {
                target,
                target_id: target_id.to_string(),
            },
            keep_tracking,
            on_finish,
        )
    }

    /// Inquire the status of the earlier request `target_id` of kind
    /// `target` on `worker`.
    pub fn status_of_request(
        self: &Arc<Self>,
        worker: &str,
        target: TargetKind,
        target_id: &str,
        keep_tracking: bool,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(
            worker,
            RequestKind::Status {
                target,
                target_id: target_id.to_string(),
            },
            keep_tracking,
            on_finish,
        )
    }

    /// Suspend the replication service of `worker`.
    pub fn suspend_worker_service(
        self: &Arc<Self>,
        worker: &str,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.service(worker, ServiceAction::Suspend, on_finish)
    }

    /// Resume the replication service of `worker`.
    pub fn resume_worker_service(
        self: &Arc<Self>,
        worker: &str,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.service(worker, ServiceAction::Resume, on_finish)
    }

    /// Inquire the status of the replication service of `worker`.
    pub fn status_of_worker_service(
        self: &Arc<Self>,
        worker: &str,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.service(worker, ServiceAction::Status, on_finish)
    }

    /// Enumerate the requests known to the replication service of `worker`.
    pub fn requests_of_worker_service(
        self: &Arc<Self>,
        worker: &str,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.service(worker, ServiceAction::Requests, on_finish)
    }

    fn service(
        self: &Arc<Self>,
        worker: &str,
        action: ServiceAction,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.submit(worker, RequestKind::Service { action }, false, on_finish)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn assert_running(&self) -> Result<()> {
        if !self.is_running() {
            return Err(SksError::Config(
                "the replica controller is not running".into(),
            ));
        }
        Ok(())
    }

    fn submit(
        self: &Arc<Self>,
        worker: &str,
        kind: RequestKind,
        keep_tracking: bool,
        on_finish: OnFinish,
    ) -> Result<Arc<ReplicaRequest>> {
        self.assert_running()?;
        let addr = self
            .workers
            .lock()
            .expect("worker lock")
            .get(worker)
            .cloned()
            .ok_or_else(|| SksError::Config(format!("unknown worker '{worker}'")))?;

        let id = Uuid::new_v4().to_string();
        let request = Arc::new(ReplicaRequest::new(
            id.clone(),
            kind,
            worker.to_string(),
            addr,
            keep_tracking,
            self.config.clone(),
        ));
        debug!(id = %id, kind = request.kind().type_name(), worker, "submit");

        self.registry.lock().expect("registry lock").insert(
            id.clone(),
            RequestWrapper {
                request: Arc::clone(&request),
                on_finish: Some(on_finish),
            },
        );
        global_metrics().add_replica_inflight(request.kind().type_name(), 1);

        // The request holds no strong reference back; the controller is
        // promoted only to deliver the finish notification.
        let controller = Arc::downgrade(self);
        let task_request = Arc::clone(&request);
        let handle = tokio::spawn(async move {
            let ext = task_request.run().await;
            global_metrics().add_replica_inflight(task_request.kind().type_name(), -1);
            global_metrics().record_replica_finished(task_request.kind().type_name(), ext.name());
            match controller.upgrade() {
                Some(controller) => controller.finish(task_request.id()),
                None => warn!("{} finished after controller drop", task_request.id()),
            }
        });
        self.tasks.lock().expect("task lock").push(handle);
        Ok(request)
    }

    // Remove the finished request from the registry, then notify the user
    // callback with no lock held: the callback may re-enter the controller.
    fn finish(&self, id: &str) {
        let wrapper = self.registry.lock().expect("registry lock").remove(id);
        match wrapper {
            Some(mut w) => {
                if let Some(cb) = w.on_finish.take() {
                    cb(Arc::clone(&w.request));
                }
            }
            None => warn!(id, "finish for unregistered request"),
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("running", &self.is_running())
            .field("active", &self.num_active())
            .finish()
    }
}
