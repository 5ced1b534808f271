use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use sks_common::ControllerConfig;

use crate::codec::{read_frame, write_frame};
use crate::messages::{
    ManagementKind, RequestBody, RequestHeader, RequestType, ResponseStatus, ServiceAction,
    TargetKind, WorkerResponse, decode_response, encode_request,
};

/// Kind of one replica-management request, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Replicate a chunk onto the destination worker from `source_worker`.
    Replicate {
        database: String,
        chunk: u32,
        source_worker: String,
    },
    /// Delete a chunk replica.
    Delete { database: String, chunk: u32 },
    /// Find one chunk replica.
    Find { database: String, chunk: u32 },
    /// Enumerate all replicas of a database.
    FindAll { database: String },
    /// Stop an earlier request.
    Stop {
        target: TargetKind,
        target_id: String,
    },
    /// Inquire the status of an earlier request.
    Status {
        target: TargetKind,
        target_id: String,
    },
    /// Worker service management.
    Service { action: ServiceAction },
}

impl RequestKind {
    /// Short type name for logs and metrics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RequestKind::Replicate { .. } => "REPLICATE",
            RequestKind::Delete { .. } => "DELETE",
            RequestKind::Find { .. } => "FIND",
            RequestKind::FindAll { .. } => "FIND_ALL",
            RequestKind::Stop { .. } => "STOP",
            RequestKind::Status { .. } => "STATUS",
            RequestKind::Service { .. } => "SERVICE",
        }
    }

    fn header_type(&self) -> RequestType {
        match self {
            RequestKind::Replicate { .. } => RequestType::Replicate,
            RequestKind::Delete { .. } => RequestType::Delete,
            RequestKind::Find { .. } => RequestType::Find,
            RequestKind::FindAll { .. } => RequestType::FindAll,
            RequestKind::Stop { .. } => RequestType::Request(ManagementKind::Stop),
            RequestKind::Status { .. } => RequestType::Request(ManagementKind::Status),
            RequestKind::Service { action } => RequestType::Service(*action),
        }
    }

    fn body(&self) -> RequestBody {
        match self {
            RequestKind::Replicate {
                database,
                chunk,
                source_worker,
            } => RequestBody::Replicate {
                database: database.clone(),
                chunk: *chunk,
                source_worker: source_worker.clone(),
            },
            RequestKind::Delete { database, chunk } => RequestBody::Delete {
                database: database.clone(),
                chunk: *chunk,
            },
            RequestKind::Find { database, chunk } => RequestBody::Find {
                database: database.clone(),
                chunk: *chunk,
            },
            RequestKind::FindAll { database } => RequestBody::FindAll {
                database: database.clone(),
            },
            RequestKind::Stop { target, target_id }
            | RequestKind::Status { target, target_id } => RequestBody::Management {
                target: *target,
                target_id: target_id.clone(),
            },
            RequestKind::Service { .. } => RequestBody::Service,
        }
    }

    // The (target kind, target id) a status poll for this request uses.
    // Service requests are single-shot and never poll.
    fn poll_target(&self, own_id: &str) -> Option<(TargetKind, String)> {
        match self {
            RequestKind::Replicate { .. } => Some((TargetKind::Replication, own_id.to_string())),
            RequestKind::Delete { .. } => Some((TargetKind::Delete, own_id.to_string())),
            RequestKind::Find { .. } => Some((TargetKind::Find, own_id.to_string())),
            RequestKind::FindAll { .. } => Some((TargetKind::FindAll, own_id.to_string())),
            RequestKind::Stop { target, target_id }
            | RequestKind::Status { target, target_id } => Some((*target, target_id.clone())),
            RequestKind::Service { .. } => None,
        }
    }
}

/// Primary public state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Constructed, no execution attempt made.
    Created,
    /// The protocol is in progress.
    InProgress,
    /// Finished; see [`ExtendedState`] for the completion status.
    Finished,
}

/// Refined state of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedState {
    /// No extended state yet.
    None,
    /// The request was fully implemented.
    Success,
    /// Unrecoverable client-side failure (transport restarts exhausted).
    ClientError,
    /// The peer violated the wire contract.
    ProtocolError,
    /// The server rejected the request parameters.
    ServerBad,
    /// Unrecoverable server-side error.
    ServerError,
    /// Found cancelled on the server.
    ServerCancelled,
    /// Queued on the server (reported as-is without tracking).
    ServerQueued,
    /// In progress on the server (reported as-is without tracking).
    ServerInProgress,
    /// Suspended on the server (reported as-is without tracking).
    ServerSuspended,
    /// Being cancelled on the server (reported as-is without tracking).
    ServerIsCancelling,
    /// Explicitly cancelled on the client side.
    Cancelled,
}

impl ExtendedState {
    /// Short name for logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            ExtendedState::None => "NONE",
            ExtendedState::Success => "SUCCESS",
            ExtendedState::ClientError => "CLIENT_ERROR",
            ExtendedState::ProtocolError => "PROTOCOL_ERROR",
            ExtendedState::ServerBad => "SERVER_BAD",
            ExtendedState::ServerError => "SERVER_ERROR",
            ExtendedState::ServerCancelled => "SERVER_CANCELLED",
            ExtendedState::ServerQueued => "SERVER_QUEUED",
            ExtendedState::ServerInProgress => "SERVER_IN_PROGRESS",
            ExtendedState::ServerSuspended => "SERVER_SUSPENDED",
            ExtendedState::ServerIsCancelling => "SERVER_IS_CANCELLING",
            ExtendedState::Cancelled => "CANCELLED",
        }
    }
}

// What run() does next after analyzing one response.
enum Analyzed {
    Finish(ExtendedState),
    Poll,
}

/// One typed request to a worker replication agent.
///
/// The request owns its protocol state machine:
/// `send request -> receive frame -> analyze status`, polling the worker
/// while the status is non-terminal (when tracking is on), restarting the
/// current step on transport errors, and finishing on terminal statuses.
pub struct ReplicaRequest {
    id: String,
    kind: RequestKind,
    worker: String,
    worker_addr: String,
    keep_tracking: bool,
    config: ControllerConfig,
    state: Mutex<(RequestState, ExtendedState)>,
    response: Mutex<Option<WorkerResponse>>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    restarts: AtomicU32,
}

impl ReplicaRequest {
    pub(crate) fn new(
        id: String,
        kind: RequestKind,
        worker: String,
        worker_addr: String,
        keep_tracking: bool,
        config: ControllerConfig,
    ) -> Self {
        Self {
            id,
            kind,
            worker,
            worker_addr,
            keep_tracking,
            config,
            state: Mutex::new((RequestState::Created, ExtendedState::None)),
            response: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            restarts: AtomicU32::new(0),
        }
    }

    /// Unique request identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request kind and parameters.
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Destination worker name.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Primary state.
    pub fn state(&self) -> RequestState {
        self.state.lock().expect("state lock").0
    }

    /// Extended completion state.
    pub fn extended_state(&self) -> ExtendedState {
        self.state.lock().expect("state lock").1
    }

    /// The last response received from the worker, if any.
    pub fn response(&self) -> Option<WorkerResponse> {
        self.response.lock().expect("response lock").clone()
    }

    /// Context string for diagnostics.
    pub fn context(&self) -> String {
        format!(
            "{} {} {:?}::{}",
            self.id,
            self.kind.type_name(),
            self.state(),
            self.extended_state().name()
        )
    }

    /// Explicitly cancel the request on the client side. The remote state
    /// of an already-queued operation is unaffected.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("{} cancel", self.context());
            self.cancel_notify.notify_one();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn finish(&self, ext: ExtendedState) -> ExtendedState {
        let mut st = self.state.lock().expect("state lock");
        if st.0 != RequestState::Finished {
            *st = (RequestState::Finished, ext);
            debug!("{} finished {}", self.id, ext.name());
        }
        st.1
    }

    // Wait on `fut`, abandoning it when the request is cancelled.
    async fn cancellable<T>(&self, fut: impl std::future::Future<Output = T>) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel_notify.notified() => None,
            v = fut => Some(v),
        }
    }

    // One more restart, or give up with CLIENT_ERROR.
    async fn restart(&self, why: &str) -> Option<()> {
        let n = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
        if n > self.config.max_restarts {
            warn!("{} out of restarts ({n}): {why}", self.id);
            return None;
        }
        debug!("{} restart {n}: {why}", self.id);
        self.cancellable(tokio::time::sleep(Duration::from_secs(
            self.config.restart_delay_seconds,
        )))
        .await
    }

    // Terminal state when restarts ran out or were interrupted.
    fn restart_failed_state(&self) -> ExtendedState {
        if self.is_cancelled() {
            ExtendedState::Cancelled
        } else {
            ExtendedState::ClientError
        }
    }

    /// Drive the protocol to a terminal state and return it.
    pub(crate) async fn run(&self) -> ExtendedState {
        {
            let mut st = self.state.lock().expect("state lock");
            st.0 = RequestState::InProgress;
        }
        // After the initial submission got any response, transport errors
        // replay the status poll, never the (non-idempotent) submission.
        let mut submitted = false;

        'connection: loop {
            if self.is_cancelled() {
                return self.finish(ExtendedState::Cancelled);
            }
            let stream = match self.cancellable(TcpStream::connect(&self.worker_addr)).await {
                None => return self.finish(ExtendedState::Cancelled),
                Some(Ok(s)) => s,
                Some(Err(e)) => match self.restart(&format!("connect: {e}")).await {
                    Some(()) => continue 'connection,
                    None => return self.finish(self.restart_failed_state()),
                },
            };
            let mut stream = stream;

            // Pick the message for the current step.
            let payload = if submitted {
                match self.kind.poll_target(&self.id) {
                    Some((target, target_id)) => encode_request(
                        &RequestHeader {
                            rtype: RequestType::Request(ManagementKind::Status),
                            id: self.id.clone(),
                        },
                        &RequestBody::Management { target, target_id },
                    ),
                    // Single-shot kinds resend; their operations are
                    // idempotent on the worker.
                    None => encode_request(
                        &RequestHeader {
                            rtype: self.kind.header_type(),
                            id: self.id.clone(),
                        },
                        &self.kind.body(),
                    ),
                }
            } else {
                encode_request(
                    &RequestHeader {
                        rtype: self.kind.header_type(),
                        id: self.id.clone(),
                    },
                    &self.kind.body(),
                )
            };

            let mut payload = payload;
            loop {
                match self.cancellable(write_frame(&mut stream, &payload)).await {
                    None => return self.finish(ExtendedState::Cancelled),
                    Some(Ok(())) => {}
                    Some(Err(e)) => match self.restart(&format!("send: {e}")).await {
                        Some(()) => continue 'connection,
                        None => return self.finish(self.restart_failed_state()),
                    },
                }

                let frame = match self
                    .cancellable(read_frame(&mut stream, self.config.max_frame_bytes))
                    .await
                {
                    None => return self.finish(ExtendedState::Cancelled),
                    Some(Ok(Ok(frame))) => frame,
                    Some(Ok(Err(e))) => {
                        warn!("{} protocol violation: {e}", self.id);
                        return self.finish(ExtendedState::ProtocolError);
                    }
                    Some(Err(e)) => match self.restart(&format!("receive: {e}")).await {
                        Some(()) => continue 'connection,
                        None => return self.finish(self.restart_failed_state()),
                    },
                };
                let response = match decode_response(&frame) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("{} bad response: {e}", self.id);
                        return self.finish(ExtendedState::ProtocolError);
                    }
                };
                let status = response.status;
                *self.response.lock().expect("response lock") = Some(response);
                if !submitted {
                    submitted = true;
                }

                match self.analyze(status) {
                    Analyzed::Finish(ext) => return self.finish(ext),
                    Analyzed::Poll => {
                        match self
                            .cancellable(tokio::time::sleep(Duration::from_secs(
                                self.config.timer_ival_seconds,
                            )))
                            .await
                        {
                            None => return self.finish(ExtendedState::Cancelled),
                            Some(()) => {}
                        }
                        let (target, target_id) = self
                            .kind
                            .poll_target(&self.id)
                            .expect("poll only scheduled for trackable kinds");
                        payload = encode_request(
                            &RequestHeader {
                                rtype: RequestType::Request(ManagementKind::Status),
                                id: self.id.clone(),
                            },
                            &RequestBody::Management { target, target_id },
                        );
                    }
                }
            }
        }
    }

    fn analyze(&self, status: ResponseStatus) -> Analyzed {
        debug!("{} analyze: {:?}", self.id, status);
        match status {
            ResponseStatus::Success => Analyzed::Finish(ExtendedState::Success),
            ResponseStatus::Bad => Analyzed::Finish(ExtendedState::ServerBad),
            ResponseStatus::Failed => Analyzed::Finish(ExtendedState::ServerError),
            ResponseStatus::Cancelled => Analyzed::Finish(ExtendedState::ServerCancelled),
            ResponseStatus::Queued
            | ResponseStatus::InProgress
            | ResponseStatus::Suspended
            | ResponseStatus::IsCancelling => {
                let trackable = self.kind.poll_target(&self.id).is_some();
                if self.keep_tracking && trackable {
                    Analyzed::Poll
                } else {
                    Analyzed::Finish(match status {
                        ResponseStatus::Queued => ExtendedState::ServerQueued,
                        ResponseStatus::InProgress => ExtendedState::ServerInProgress,
                        ResponseStatus::Suspended => ExtendedState::ServerSuspended,
                        _ => ExtendedState::ServerIsCancelling,
                    })
                }
            }
        }
    }
}

impl std::fmt::Debug for ReplicaRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaRequest")
            .field("id", &self.id)
            .field("kind", &self.kind.type_name())
            .field("worker", &self.worker)
            .field("state", &self.state())
            .field("extended_state", &self.extended_state().name())
            .finish()
    }
}
