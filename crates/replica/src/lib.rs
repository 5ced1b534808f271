//! Replica control plane for SkyShard workers.
//!
//! An asynchronous controller issues typed requests (replicate / delete /
//! find / stop / status / service management) to worker replication agents
//! over a length-prefixed binary protocol, and tracks every outstanding
//! request in one registry until its terminal completion.
//!
//! Key modules:
//! - [`codec`]: big-endian length-prefixed framing and primitive
//!   encode/decode helpers
//! - [`messages`]: the wire message set (request headers/bodies, response
//!   statuses, per-kind response extensions)
//! - [`request`]: one request's protocol state machine
//!   (`send -> receive -> analyze`, with status polling and restarts)
//! - [`controller`]: the request registry and the user-facing API

pub mod codec;
pub mod controller;
pub mod messages;
pub mod request;

#[cfg(test)]
mod controller_tests;

pub use codec::{FrameError, MAX_DEFAULT_FRAME_BYTES};
pub use controller::{Controller, OnFinish};
pub use messages::{
    ManagementKind, ReplicaInfo, RequestBody, RequestHeader, RequestType, ResponseExt,
    ResponseStatus, ServiceAction, ServiceState, TargetKind, WorkerResponse,
};
pub use request::{ExtendedState, ReplicaRequest, RequestKind, RequestState};
