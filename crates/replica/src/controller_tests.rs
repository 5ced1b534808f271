use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sks_common::ControllerConfig;

use crate::codec::{MAX_DEFAULT_FRAME_BYTES, read_frame, write_frame};
use crate::controller::Controller;
use crate::messages::{
    ManagementKind, ReplicaInfo, RequestBody, RequestHeader, RequestType, ResponseExt,
    ResponseStatus, ServiceState, TargetKind, WorkerResponse, decode_request, encode_response,
};
use crate::request::{ExtendedState, ReplicaRequest, RequestState};

/// Worker agent double: answers each incoming request with the next
/// scripted response and records what it saw.
struct MockWorker {
    addr: String,
    seen: Arc<Mutex<Vec<(RequestHeader, RequestBody)>>>,
}

impl MockWorker {
    async fn spawn(script: Vec<WorkerResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let script = Arc::new(Mutex::new(script.into_iter().collect::<VecDeque<_>>()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_task = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let script = Arc::clone(&script);
                let seen = Arc::clone(&seen_task);
                tokio::spawn(async move {
                    loop {
                        let frame = match read_frame(&mut stream, MAX_DEFAULT_FRAME_BYTES).await {
                            Ok(Ok(frame)) => frame,
                            _ => return,
                        };
                        let decoded = decode_request(&frame).expect("decodable request");
                        seen.lock().unwrap().push(decoded);
                        let response = script.lock().unwrap().pop_front().unwrap_or(
                            WorkerResponse {
                                status: ResponseStatus::Success,
                                ext: ResponseExt::None,
                            },
                        );
                        if write_frame(&mut stream, &encode_response(&response))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                });
            }
        });
        Self { addr, seen }
    }

    fn seen(&self) -> Vec<(RequestHeader, RequestBody)> {
        self.seen.lock().unwrap().clone()
    }
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        timer_ival_seconds: 0,
        restart_delay_seconds: 0,
        max_restarts: 2,
        ..ControllerConfig::default()
    }
}

async fn controller_for(worker: &MockWorker) -> Arc<Controller> {
    let controller = Controller::new(fast_config());
    controller.add_worker("worker-1", worker.addr.clone());
    controller.run();
    controller
}

fn finish_channel() -> (
    crate::controller::OnFinish,
    mpsc::UnboundedReceiver<Arc<ReplicaRequest>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Box::new(move |request| {
            let _ = tx.send(request);
        }),
        rx,
    )
}

#[tokio::test]
async fn replicate_polls_until_success() {
    let worker = MockWorker::spawn(vec![
        WorkerResponse {
            status: ResponseStatus::Queued,
            ext: ResponseExt::None,
        },
        WorkerResponse {
            status: ResponseStatus::Success,
            ext: ResponseExt::ReplicaInfo(ReplicaInfo {
                worker: "worker-1".into(),
                database: "LSST".into(),
                chunk: 1234,
                state: "COMPLETE".into(),
            }),
        },
    ])
    .await;
    let controller = controller_for(&worker).await;
    let (on_finish, mut rx) = finish_channel();

    let request = controller
        .replicate("worker-1", "worker-2", "LSST", 1234, on_finish)
        .unwrap();
    let finished = rx.recv().await.expect("finish callback");
    assert_eq!(finished.id(), request.id());
    assert_eq!(finished.state(), RequestState::Finished);
    assert_eq!(finished.extended_state(), ExtendedState::Success);
    match finished.response().unwrap().ext {
        ResponseExt::ReplicaInfo(info) => assert_eq!(info.chunk, 1234),
        other => panic!("unexpected ext: {other:?}"),
    }

    // The registry entry is gone once the user callback ran.
    assert_eq!(controller.num_active(), 0);
    assert!(!controller.is_active(request.id()));

    // First message was the submission, second the status poll with the
    // same id as its target.
    let seen = worker.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0.rtype, RequestType::Replicate);
    assert_eq!(
        seen[1].0.rtype,
        RequestType::Request(ManagementKind::Status)
    );
    match &seen[1].1 {
        RequestBody::Management { target, target_id } => {
            assert_eq!(*target, TargetKind::Replication);
            assert_eq!(target_id, request.id());
        }
        other => panic!("unexpected poll body: {other:?}"),
    }

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn non_tracking_status_returns_non_terminal_as_is() {
    let worker = MockWorker::spawn(vec![WorkerResponse {
        status: ResponseStatus::Queued,
        ext: ResponseExt::None,
    }])
    .await;
    let controller = controller_for(&worker).await;
    let (on_finish, mut rx) = finish_channel();

    controller
        .status_of_request("worker-1", TargetKind::Replication, "some-id", false, on_finish)
        .unwrap();
    let finished = rx.recv().await.expect("finish callback");
    assert_eq!(finished.extended_state(), ExtendedState::ServerQueued);
    assert_eq!(
        finished.response().unwrap().status,
        ResponseStatus::Queued
    );
    assert_eq!(worker.seen().len(), 1);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn server_failure_statuses_map_to_extended_states() {
    for (status, expected) in [
        (ResponseStatus::Bad, ExtendedState::ServerBad),
        (ResponseStatus::Failed, ExtendedState::ServerError),
        (ResponseStatus::Cancelled, ExtendedState::ServerCancelled),
    ] {
        let worker = MockWorker::spawn(vec![WorkerResponse {
            status,
            ext: ResponseExt::None,
        }])
        .await;
        let controller = controller_for(&worker).await;
        let (on_finish, mut rx) = finish_channel();
        controller
            .delete_replica("worker-1", "LSST", 7, on_finish)
            .unwrap();
        let finished = rx.recv().await.expect("finish callback");
        assert_eq!(finished.extended_state(), expected);
        controller.stop().await.unwrap();
    }
}

#[tokio::test]
async fn unreachable_worker_exhausts_restarts_into_client_error() {
    // Bind and immediately drop to get an address nothing listens on.
    let dead_addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().to_string()
    };
    let controller = Controller::new(fast_config());
    controller.add_worker("worker-1", dead_addr);
    controller.run();
    let (on_finish, mut rx) = finish_channel();

    controller
        .find_replica("worker-1", "LSST", 9, on_finish)
        .unwrap();
    let finished = rx.recv().await.expect("finish callback");
    assert_eq!(finished.extended_state(), ExtendedState::ClientError);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn service_requests_are_single_shot() {
    let worker = MockWorker::spawn(vec![WorkerResponse {
        status: ResponseStatus::Success,
        ext: ResponseExt::ServiceState(ServiceState {
            state: "SUSPENDED".into(),
            num_queued: 2,
            num_in_progress: 0,
            num_finished: 5,
        }),
    }])
    .await;
    let controller = controller_for(&worker).await;
    let (on_finish, mut rx) = finish_channel();

    controller
        .suspend_worker_service("worker-1", on_finish)
        .unwrap();
    let finished = rx.recv().await.expect("finish callback");
    assert_eq!(finished.extended_state(), ExtendedState::Success);
    match finished.response().unwrap().ext {
        ResponseExt::ServiceState(state) => assert_eq!(state.state, "SUSPENDED"),
        other => panic!("unexpected ext: {other:?}"),
    }
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn callbacks_may_reenter_the_controller() {
    let worker = MockWorker::spawn(vec![
        WorkerResponse {
            status: ResponseStatus::Success,
            ext: ResponseExt::None,
        },
        WorkerResponse {
            status: ResponseStatus::Success,
            ext: ResponseExt::None,
        },
    ])
    .await;
    let controller = controller_for(&worker).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let reenter = Arc::clone(&controller);
    let inner_tx = tx.clone();
    controller
        .find_all_replicas(
            "worker-1",
            "LSST",
            Box::new(move |request| {
                // By notification time the entry is gone, so the controller
                // API is safe to use from inside the callback.
                assert!(!reenter.is_active(request.id()));
                reenter
                    .find_replica(
                        "worker-1",
                        "LSST",
                        1,
                        Box::new(move |inner| {
                            let _ = inner_tx.send(inner);
                        }),
                    )
                    .unwrap();
            }),
        )
        .unwrap();

    let inner = rx.recv().await.expect("nested request finished");
    assert_eq!(inner.extended_state(), ExtendedState::Success);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn requests_are_refused_unless_running() {
    let controller = Controller::new(fast_config());
    controller.add_worker("worker-1", "127.0.0.1:1");
    let (on_finish, _rx) = finish_channel();
    assert!(
        controller
            .replicate("worker-1", "worker-2", "LSST", 1, on_finish)
            .is_err()
    );
}

#[tokio::test]
async fn unknown_worker_is_refused() {
    let controller = Controller::new(fast_config());
    controller.run();
    let (on_finish, _rx) = finish_channel();
    assert!(
        controller
            .replicate("nope", "worker-2", "LSST", 1, on_finish)
            .is_err()
    );
}

#[tokio::test]
async fn cancelled_request_finishes_cancelled() {
    // A worker that accepts connections but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        // Hold accepted connections open without ever responding.
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            held.push(stream);
        }
    });

    let controller = Controller::new(fast_config());
    controller.add_worker("worker-1", addr);
    controller.run();
    let (on_finish, mut rx) = finish_channel();
    let request = controller
        .replicate("worker-1", "worker-2", "LSST", 3, on_finish)
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    request.cancel();
    let finished = rx.recv().await.expect("finish callback");
    assert_eq!(finished.extended_state(), ExtendedState::Cancelled);
    assert_eq!(controller.num_active(), 0);
    controller.stop().await.unwrap();
}
