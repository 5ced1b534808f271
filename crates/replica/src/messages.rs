//! Wire message set of the replica protocol.
//!
//! Every exchange is one request frame answered by one response frame. A
//! frame body is a [`RequestHeader`] followed by the request body, or a
//! [`WorkerResponse`]. Status queries are distinct messages carrying the
//! id of the request they target.

use bytes::{BufMut, BytesMut};

use crate::codec::{
    FrameError, FrameResult, expect_empty, read_string, read_u8, read_u32, write_string,
};

// ── Type tags ────────────────────────────────────────────────────────────

const T_REPLICATE: u8 = 0;
const T_DELETE: u8 = 1;
const T_FIND: u8 = 2;
const T_FIND_ALL: u8 = 3;
const T_REQUEST: u8 = 4;
const T_SERVICE: u8 = 5;

const M_STATUS: u8 = 0;
const M_STOP: u8 = 1;

const S_SUSPEND: u8 = 0;
const S_RESUME: u8 = 1;
const S_STATUS: u8 = 2;
const S_REQUESTS: u8 = 3;

const K_REPLICATION: u8 = 0;
const K_DELETE: u8 = 1;
const K_FIND: u8 = 2;
const K_FIND_ALL: u8 = 3;

const ST_SUCCESS: u8 = 0;
const ST_QUEUED: u8 = 1;
const ST_IN_PROGRESS: u8 = 2;
const ST_IS_CANCELLING: u8 = 3;
const ST_SUSPENDED: u8 = 4;
const ST_BAD: u8 = 5;
const ST_FAILED: u8 = 6;
const ST_CANCELLED: u8 = 7;

const E_NONE: u8 = 0;
const E_REPLICA_INFO: u8 = 1;
const E_DELETE_INFO: u8 = 2;
const E_REPLICA_INFO_MANY: u8 = 3;
const E_SERVICE_STATE: u8 = 4;

/// Top-level request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Replicate,
    Delete,
    Find,
    FindAll,
    /// Request management (status/stop of an earlier request).
    Request(ManagementKind),
    /// Worker service management.
    Service(ServiceAction),
}

/// Management subtype of a [`RequestType::Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementKind {
    Status,
    Stop,
}

/// Action of a [`RequestType::Service`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Suspend,
    Resume,
    Status,
    Requests,
}

/// Kind of the request a management message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Replication,
    Delete,
    Find,
    FindAll,
}

/// Header of every request frame: the type (with subtype where needed)
/// and the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Request type.
    pub rtype: RequestType,
    /// Unique request id; a status query carries the same id as its
    /// target's submission did.
    pub id: String,
}

/// Body of one request, matched to the header's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Replicate `chunk` of `database` from `source_worker`.
    Replicate {
        database: String,
        chunk: u32,
        source_worker: String,
    },
    /// Delete the replica of `chunk` of `database`.
    Delete { database: String, chunk: u32 },
    /// Find the replica of `chunk` of `database`.
    Find { database: String, chunk: u32 },
    /// Enumerate all replicas of `database`.
    FindAll { database: String },
    /// Status or stop of an earlier request.
    Management {
        target: TargetKind,
        target_id: String,
    },
    /// Service management requests carry no body.
    Service,
}

/// One replica as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub worker: String,
    pub database: String,
    pub chunk: u32,
    pub state: String,
}

/// Worker replication-service counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub state: String,
    pub num_queued: u32,
    pub num_in_progress: u32,
    pub num_finished: u32,
}

/// Top-level response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Queued,
    InProgress,
    IsCancelling,
    Suspended,
    Bad,
    Failed,
    Cancelled,
}

impl ResponseStatus {
    /// Whether the worker will keep working on the request.
    pub fn is_non_terminal(self) -> bool {
        matches!(
            self,
            ResponseStatus::Queued
                | ResponseStatus::InProgress
                | ResponseStatus::Suspended
                | ResponseStatus::IsCancelling
        )
    }
}

/// Request-kind-specific response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseExt {
    None,
    ReplicaInfo(ReplicaInfo),
    DeleteInfo { database: String, chunk: u32 },
    ReplicaInfoMany(Vec<ReplicaInfo>),
    ServiceState(ServiceState),
}

/// One response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    /// Top-level status.
    pub status: ResponseStatus,
    /// Per-kind extension payload.
    pub ext: ResponseExt,
}

// ── Request encode/decode ────────────────────────────────────────────────

/// Encode one request (header + body) into a frame payload.
pub fn encode_request(header: &RequestHeader, body: &RequestBody) -> Vec<u8> {
    let mut out = BytesMut::new();
    match header.rtype {
        RequestType::Replicate => out.put_u8(T_REPLICATE),
        RequestType::Delete => out.put_u8(T_DELETE),
        RequestType::Find => out.put_u8(T_FIND),
        RequestType::FindAll => out.put_u8(T_FIND_ALL),
        RequestType::Request(kind) => {
            out.put_u8(T_REQUEST);
            out.put_u8(match kind {
                ManagementKind::Status => M_STATUS,
                ManagementKind::Stop => M_STOP,
            });
        }
        RequestType::Service(action) => {
            out.put_u8(T_SERVICE);
            out.put_u8(match action {
                ServiceAction::Suspend => S_SUSPEND,
                ServiceAction::Resume => S_RESUME,
                ServiceAction::Status => S_STATUS,
                ServiceAction::Requests => S_REQUESTS,
            });
        }
    }
    write_string(&mut out, &header.id);
    match body {
        RequestBody::Replicate {
            database,
            chunk,
            source_worker,
        } => {
            write_string(&mut out, database);
            out.put_u32(*chunk);
            write_string(&mut out, source_worker);
        }
        RequestBody::Delete { database, chunk } | RequestBody::Find { database, chunk } => {
            write_string(&mut out, database);
            out.put_u32(*chunk);
        }
        RequestBody::FindAll { database } => {
            write_string(&mut out, database);
        }
        RequestBody::Management { target, target_id } => {
            out.put_u8(match target {
                TargetKind::Replication => K_REPLICATION,
                TargetKind::Delete => K_DELETE,
                TargetKind::Find => K_FIND,
                TargetKind::FindAll => K_FIND_ALL,
            });
            write_string(&mut out, target_id);
        }
        RequestBody::Service => {}
    }
    out.to_vec()
}

/// Decode one request frame payload into header and body.
pub fn decode_request(payload: &[u8]) -> FrameResult<(RequestHeader, RequestBody)> {
    let mut buf = payload;
    let tag = read_u8(&mut buf)?;
    let rtype = match tag {
        T_REPLICATE => RequestType::Replicate,
        T_DELETE => RequestType::Delete,
        T_FIND => RequestType::Find,
        T_FIND_ALL => RequestType::FindAll,
        T_REQUEST => {
            let sub = read_u8(&mut buf)?;
            RequestType::Request(match sub {
                M_STATUS => ManagementKind::Status,
                M_STOP => ManagementKind::Stop,
                v => {
                    return Err(FrameError::BadTag {
                        field: "management_type",
                        value: v,
                    });
                }
            })
        }
        T_SERVICE => {
            let sub = read_u8(&mut buf)?;
            RequestType::Service(match sub {
                S_SUSPEND => ServiceAction::Suspend,
                S_RESUME => ServiceAction::Resume,
                S_STATUS => ServiceAction::Status,
                S_REQUESTS => ServiceAction::Requests,
                v => {
                    return Err(FrameError::BadTag {
                        field: "service_type",
                        value: v,
                    });
                }
            })
        }
        v => {
            return Err(FrameError::BadTag {
                field: "request_type",
                value: v,
            });
        }
    };
    let id = read_string(&mut buf, "request_id")?;
    let body = match rtype {
        RequestType::Replicate => RequestBody::Replicate {
            database: read_string(&mut buf, "database")?,
            chunk: read_u32(&mut buf)?,
            source_worker: read_string(&mut buf, "source_worker")?,
        },
        RequestType::Delete => RequestBody::Delete {
            database: read_string(&mut buf, "database")?,
            chunk: read_u32(&mut buf)?,
        },
        RequestType::Find => RequestBody::Find {
            database: read_string(&mut buf, "database")?,
            chunk: read_u32(&mut buf)?,
        },
        RequestType::FindAll => RequestBody::FindAll {
            database: read_string(&mut buf, "database")?,
        },
        RequestType::Request(_) => {
            let target = match read_u8(&mut buf)? {
                K_REPLICATION => TargetKind::Replication,
                K_DELETE => TargetKind::Delete,
                K_FIND => TargetKind::Find,
                K_FIND_ALL => TargetKind::FindAll,
                v => {
                    return Err(FrameError::BadTag {
                        field: "target_kind",
                        value: v,
                    });
                }
            };
            RequestBody::Management {
                target,
                target_id: read_string(&mut buf, "target_id")?,
            }
        }
        RequestType::Service(_) => RequestBody::Service,
    };
    expect_empty(buf)?;
    Ok((RequestHeader { rtype, id }, body))
}

// ── Response encode/decode ───────────────────────────────────────────────

fn put_replica_info(out: &mut BytesMut, info: &ReplicaInfo) {
    write_string(out, &info.worker);
    write_string(out, &info.database);
    out.put_u32(info.chunk);
    write_string(out, &info.state);
}

fn read_replica_info(buf: &mut &[u8]) -> FrameResult<ReplicaInfo> {
    Ok(ReplicaInfo {
        worker: read_string(buf, "worker")?,
        database: read_string(buf, "database")?,
        chunk: read_u32(buf)?,
        state: read_string(buf, "replica_state")?,
    })
}

/// Encode one response into a frame payload.
pub fn encode_response(resp: &WorkerResponse) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u8(match resp.status {
        ResponseStatus::Success => ST_SUCCESS,
        ResponseStatus::Queued => ST_QUEUED,
        ResponseStatus::InProgress => ST_IN_PROGRESS,
        ResponseStatus::IsCancelling => ST_IS_CANCELLING,
        ResponseStatus::Suspended => ST_SUSPENDED,
        ResponseStatus::Bad => ST_BAD,
        ResponseStatus::Failed => ST_FAILED,
        ResponseStatus::Cancelled => ST_CANCELLED,
    });
    match &resp.ext {
        ResponseExt::None => out.put_u8(E_NONE),
        ResponseExt::ReplicaInfo(info) => {
            out.put_u8(E_REPLICA_INFO);
            put_replica_info(&mut out, info);
        }
        ResponseExt::DeleteInfo { database, chunk } => {
            out.put_u8(E_DELETE_INFO);
            write_string(&mut out, database);
            out.put_u32(*chunk);
        }
        ResponseExt::ReplicaInfoMany(infos) => {
            out.put_u8(E_REPLICA_INFO_MANY);
            out.put_u32(infos.len() as u32);
            for info in infos {
                put_replica_info(&mut out, info);
            }
        }
        ResponseExt::ServiceState(state) => {
            out.put_u8(E_SERVICE_STATE);
            write_string(&mut out, &state.state);
            out.put_u32(state.num_queued);
            out.put_u32(state.num_in_progress);
            out.put_u32(state.num_finished);
        }
    }
    out.to_vec()
}

/// Decode one response frame payload.
pub fn decode_response(payload: &[u8]) -> FrameResult<WorkerResponse> {
    let mut buf = payload;
    let status = match read_u8(&mut buf)? {
        ST_SUCCESS => ResponseStatus::Success,
        ST_QUEUED => ResponseStatus::Queued,
        ST_IN_PROGRESS => ResponseStatus::InProgress,
        ST_IS_CANCELLING => ResponseStatus::IsCancelling,
        ST_SUSPENDED => ResponseStatus::Suspended,
        ST_BAD => ResponseStatus::Bad,
        ST_FAILED => ResponseStatus::Failed,
        ST_CANCELLED => ResponseStatus::Cancelled,
        v => {
            return Err(FrameError::BadTag {
                field: "status",
                value: v,
            });
        }
    };
    let ext = match read_u8(&mut buf)? {
        E_NONE => ResponseExt::None,
        E_REPLICA_INFO => ResponseExt::ReplicaInfo(read_replica_info(&mut buf)?),
        E_DELETE_INFO => ResponseExt::DeleteInfo {
            database: read_string(&mut buf, "database")?,
            chunk: read_u32(&mut buf)?,
        },
        E_REPLICA_INFO_MANY => {
            let n = read_u32(&mut buf)? as usize;
            let mut infos = Vec::with_capacity(n);
            for _ in 0..n {
                infos.push(read_replica_info(&mut buf)?);
            }
            ResponseExt::ReplicaInfoMany(infos)
        }
        E_SERVICE_STATE => ResponseExt::ServiceState(ServiceState {
            state: read_string(&mut buf, "service_state")?,
            num_queued: read_u32(&mut buf)?,
            num_in_progress: read_u32(&mut buf)?,
            num_finished: read_u32(&mut buf)?,
        }),
        v => {
            return Err(FrameError::BadTag {
                field: "response_ext",
                value: v,
            });
        }
    };
    expect_empty(buf)?;
    Ok(WorkerResponse { status, ext })
}
