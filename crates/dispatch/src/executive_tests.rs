use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use sks_analysis::{ChunkQuerySpec, TaskMsg};
use sks_common::{ExecutiveConfig, JobId, ResourceUnit};

use crate::executive::Executive;
use crate::job_description::JobDescription;
use crate::job_status::JobState;
use crate::merging_handler::{InfileMerger, MergingHandler};
use crate::message_store::MessageStore;
use crate::mock::{MockScript, MockSessionService};
use crate::response_handler::{HandlerError, ResponseHandler};

/// Handler accepting every flush, counting lifecycle calls.
struct CountingHandler {
    buffer: Arc<StdMutex<Vec<u8>>>,
    cancels: AtomicU32,
    resets: AtomicU32,
    reset_ok: AtomicBool,
    flushed: StdMutex<Vec<u8>>,
    done: AtomicBool,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buffer: Arc::new(StdMutex::new(Vec::new())),
            cancels: AtomicU32::new(0),
            resets: AtomicU32::new(0),
            reset_ok: AtomicBool::new(true),
            flushed: StdMutex::new(Vec::new()),
            done: AtomicBool::new(false),
        })
    }
}

impl ResponseHandler for CountingHandler {
    fn next_buffer(&self) -> Arc<StdMutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }

    fn next_buffer_size(&self) -> usize {
        4096
    }

    fn flush(&self, len: usize, last: bool, _large_result: &mut bool) -> bool {
        let buf = self.buffer.lock().unwrap();
        let mut block: &[u8] = &buf[..len];
        block = block.strip_prefix(crate::RESULT_MAGIC.as_slice()).unwrap_or(block);
        self.flushed.lock().unwrap().extend_from_slice(block);
        if last {
            self.done.store(true, Ordering::Release);
        }
        true
    }

    fn error_flush(&self, _msg: &str, _code: i32) {}

    fn finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn reset(&self) -> bool {
        self.resets.fetch_add(1, Ordering::AcqRel);
        self.reset_ok.load(Ordering::Acquire)
    }

    fn process_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
    }

    fn get_error(&self) -> Option<HandlerError> {
        None
    }

    fn prep_scrub_results(&self, _job_id: JobId, _attempt: u32) -> bool {
        self.flushed.lock().unwrap().clear();
        true
    }
}

fn payload(job: u32) -> Vec<u8> {
    TaskMsg::from_chunk_query(
        1,
        job,
        format!("r_{job}"),
        &ChunkQuerySpec {
            db: "LSST".into(),
            chunk_id: job as i32 + 1000,
            subchunks: vec![],
            queries: vec![format!("SELECT ra FROM Object_{}", job + 1000)],
        },
    )
    .serialize()
    .unwrap()
}

fn description(job: u32, handler: Arc<dyn ResponseHandler>, max_attempts: u32) -> JobDescription {
    JobDescription::new(
        JobId(job),
        ResourceUnit::db_chunk("LSST", job as i32 + 1000),
        payload(job),
        handler,
        max_attempts,
    )
}

fn fast_config() -> ExecutiveConfig {
    ExecutiveConfig {
        attempt_sleep_seconds: 0,
        ..ExecutiveConfig::default()
    }
}

fn executive_with(service: Arc<MockSessionService>) -> Arc<Executive> {
    Executive::with_service(fast_config(), service, Arc::new(MessageStore::new()))
}

#[tokio::test]
async fn join_with_zero_jobs_returns_true_immediately() {
    let exec = executive_with(Arc::new(MockSessionService::new()));
    assert!(exec.is_empty());
    assert!(exec.join().await);
    assert!(exec.is_empty());
    assert_eq!(exec.num_inflight(), 0);
}

#[tokio::test]
async fn four_jobs_all_succeed() {
    let service = Arc::new(MockSessionService::new());
    service.push_scripts(MockScript::rows(b"rows\n"), 4);
    let exec = executive_with(service);

    let mut handlers = Vec::new();
    for i in 0..4 {
        let h = CountingHandler::new();
        handlers.push(Arc::clone(&h));
        exec.add(description(i, h, 3)).unwrap();
    }
    assert!(exec.join().await);
    assert!(exec.is_empty());
    assert_eq!(exec.num_inflight(), 0);
    assert!(exec.error_desc().is_empty());
    for h in handlers {
        assert!(h.finished());
        assert_eq!(h.flushed.lock().unwrap().as_slice(), b"rows\n");
        assert_eq!(h.cancels.load(Ordering::Acquire), 0);
    }
}

#[tokio::test]
async fn squash_cancels_every_job_and_join_returns_false() {
    let service = Arc::new(MockSessionService::new());
    service.push_scripts(MockScript::Hang, 20);
    let exec = executive_with(service);

    let mut handlers = Vec::new();
    for i in 0..20 {
        let h = CountingHandler::new();
        handlers.push(Arc::clone(&h));
        exec.add(description(i, h, 3)).unwrap();
    }
    exec.squash().await;
    // Idempotent.
    exec.squash().await;
    assert!(!exec.join().await);
    assert!(exec.is_cancelled());
    assert_eq!(exec.num_inflight(), 0);
    for h in &handlers {
        assert_eq!(h.cancels.load(Ordering::Acquire), 1);
    }
    // Cancellation is not reported as failure.
    assert!(exec.error_desc().is_empty());
}

#[tokio::test]
async fn add_after_squash_fails_fast() {
    let exec = executive_with(Arc::new(MockSessionService::new()));
    exec.squash().await;
    let h = CountingHandler::new();
    assert!(exec.add(description(0, h, 3)).is_err());
}

#[tokio::test]
async fn provision_refusals_are_retried_until_success() {
    let service = Arc::new(MockSessionService::new());
    service.refuse_provisions(2);
    service.push_script(MockScript::rows(b"late rows"));
    let exec = executive_with(Arc::clone(&service));

    let h = CountingHandler::new();
    let job = exec.add(description(0, Arc::clone(&h) as _, 5)).unwrap();
    assert!(exec.join().await);
    assert_eq!(job.attempt_count(), 3);
    assert!(service.provision_count() >= 3);
    assert!(h.finished());
}

#[tokio::test]
async fn exceeding_attempt_cap_squashes_the_query() {
    let service = Arc::new(MockSessionService::new());
    service.refuse_provisions(10);
    let exec = executive_with(service);

    let h = CountingHandler::new();
    exec.add(description(0, h, 2)).unwrap();
    assert!(!exec.join().await);
    assert!(exec.is_cancelled());
}

#[tokio::test]
async fn worker_error_response_is_terminal_failure() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::RespondError {
        code: 1105,
        msg: "worker exploded".into(),
    });
    let exec = executive_with(service);

    let h = CountingHandler::new();
    let job = exec.add(description(0, h, 3)).unwrap();
    assert!(!exec.join().await);
    assert_eq!(job.status().state(), JobState::ResponseError);
    assert_eq!(job.attempt_count(), 1);
    assert!(exec.error_desc().contains("1105"));
}

#[tokio::test]
async fn transport_data_error_is_retried_then_succeeds() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::DataError {
        good_frames: vec![b"partial".to_vec()],
        code: -7,
        msg: "link dropped".into(),
    });
    service.push_script(MockScript::rows(b"full rows"));
    let exec = executive_with(service);

    let h = CountingHandler::new();
    let job = exec.add(description(0, Arc::clone(&h) as _, 3)).unwrap();
    assert!(exec.join().await);
    assert_eq!(job.attempt_count(), 2);
    assert_eq!(job.status().state(), JobState::Complete);
    // The retry scrubbed the partial rows before re-streaming.
    assert_eq!(h.flushed.lock().unwrap().as_slice(), b"full rows");
}

#[tokio::test]
async fn corrupt_frame_is_terminal() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::CorruptFrame);
    let exec = executive_with(service);

    let merger = Arc::new(InfileMerger::new("1", None));
    let handler = Arc::new(MergingHandler::new(Arc::clone(&merger), "r_0"));
    let job = exec.add(description(0, handler, 3)).unwrap();
    assert!(!exec.join().await);
    assert_eq!(job.status().state(), JobState::ResponseDataErrorCorrupt);
    assert_eq!(job.attempt_count(), 1);
}

#[tokio::test]
async fn merge_refusal_is_terminal_merge_error() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::rows(b"rows"));
    let exec = executive_with(service);

    let merger = Arc::new(InfileMerger::new("1", None));
    // A finalized merger refuses every block.
    merger.finalize().unwrap();
    let handler = Arc::new(MergingHandler::new(merger, "r_0"));
    let job = exec.add(description(0, handler, 3)).unwrap();
    assert!(!exec.join().await);
    assert_eq!(job.status().state(), JobState::MergeError);
}

#[tokio::test]
async fn cancel_called_repeatedly_cancels_handler_once() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::Hang);
    let exec = executive_with(service);

    let h = CountingHandler::new();
    let job = exec.add(description(0, Arc::clone(&h) as _, 3)).unwrap();
    exec.wait_for_all_jobs_to_start().await;
    assert!(job.cancel().await);
    assert!(!job.cancel().await);
    assert!(!job.cancel().await);
    // A single cancelled job is silent: not squashed, not a failure.
    assert!(exec.join().await);
    assert_eq!(h.cancels.load(Ordering::Acquire), 1);
}

#[tokio::test]
async fn handler_refusing_reset_fails_the_job() {
    let service = Arc::new(MockSessionService::new());
    let exec = executive_with(service);

    let h = CountingHandler::new();
    h.reset_ok.store(false, Ordering::Release);
    exec.add(description(0, Arc::clone(&h) as _, 3)).unwrap();
    assert!(!exec.join().await);
    assert!(!exec.error_desc().is_empty());
}

#[tokio::test]
async fn merging_jobs_land_rows_in_the_merge_store() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::Stream {
        frames: vec![b"a,1\n".to_vec(), b"b,2\n".to_vec()],
    });
    let exec = executive_with(service);

    let merger = Arc::new(InfileMerger::new("1", Some("SELECT * FROM results".into())));
    let handler = Arc::new(MergingHandler::new(Arc::clone(&merger), "r_0"));
    exec.add(description(0, handler, 3)).unwrap();
    assert!(exec.join().await);
    merger.finalize().unwrap();
    assert_eq!(merger.table_bytes("r_0").unwrap(), b"a,1\nb,2\n");
    assert_eq!(merger.merge_sql(), Some("SELECT * FROM results"));
}

#[tokio::test]
async fn progress_desc_reflects_completion() {
    let service = Arc::new(MockSessionService::new());
    service.push_scripts(MockScript::rows(b"x"), 2);
    let exec = executive_with(service);
    for i in 0..2 {
        exec.add(description(i, CountingHandler::new(), 3)).unwrap();
    }
    assert!(exec.join().await);
    let desc = exec.progress_desc();
    assert!(desc.contains("2/2 jobs complete"), "got: {desc}");
}

// Give spawned mock tasks a chance to settle before asserting nothing
// unexpected arrives late.
#[tokio::test]
async fn late_data_after_cancel_is_ignored() {
    let service = Arc::new(MockSessionService::new());
    service.push_script(MockScript::Hang);
    let exec = executive_with(service);

    let h = CountingHandler::new();
    let job = exec.add(description(0, Arc::clone(&h) as _, 3)).unwrap();
    exec.wait_for_all_jobs_to_start().await;
    job.cancel().await;
    assert!(exec.join().await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.flushed.lock().unwrap().is_empty());
    assert_eq!(job.status().state(), JobState::Cancelled);
}
