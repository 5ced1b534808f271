use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sks_common::{ResourceUnit, Result, SksError};
use tracing::debug;

use crate::merging_handler::RESULT_MAGIC;
use crate::session_service::{
    ErrInfo, RespInfo, SessionCallback, SessionChannel, SessionService,
};

/// Scripted behavior of one mock request.
#[derive(Debug, Clone)]
pub enum MockScript {
    /// Stream `frames` (delivered in order; the last one is flagged) and
    /// complete.
    Stream {
        /// Data frames, excluding the magic header (prepended to the first
        /// frame automatically).
        frames: Vec<Vec<u8>>,
    },
    /// Answer with a worker error response instead of data.
    RespondError {
        /// Worker error code.
        code: i32,
        /// Worker error message.
        msg: String,
    },
    /// Stream `good_frames`, then fail data delivery with a service error.
    DataError {
        /// Frames delivered before the failure.
        good_frames: Vec<Vec<u8>>,
        /// Service error code.
        code: i32,
        /// Service error message.
        msg: String,
    },
    /// Stream one frame that violates the result protocol (no magic).
    CorruptFrame,
    /// Accept the request and never respond (until cancelled).
    Hang,
}

impl MockScript {
    /// A one-frame success stream carrying `payload` rows.
    pub fn rows(payload: &[u8]) -> Self {
        MockScript::Stream {
            frames: vec![payload.to_vec()],
        }
    }
}

/// In-process session service selected by the `"Mock"` service URL.
///
/// Tests program it with per-resource scripts and provisioning refusals;
/// unscripted requests succeed with one empty result frame.
pub struct MockSessionService {
    scripts: Mutex<VecDeque<MockScript>>,
    provision_refusals: AtomicU32,
    provisions: AtomicU32,
    processed: Arc<AtomicU32>,
}

impl Default for MockSessionService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionService {
    /// A mock where every request succeeds with an empty result.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            provision_refusals: AtomicU32::new(0),
            provisions: AtomicU32::new(0),
            processed: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue the script used by the next unprogrammed request. Scripts are
    /// consumed in FIFO order; when the queue is empty the default success
    /// script applies.
    pub fn push_script(&self, script: MockScript) {
        self.scripts.lock().expect("script lock").push_back(script);
    }

    /// Queue `script` for the next `n` requests.
    pub fn push_scripts(&self, script: MockScript, n: usize) {
        let mut scripts = self.scripts.lock().expect("script lock");
        for _ in 0..n {
            scripts.push_back(script.clone());
        }
    }

    /// Refuse the next `n` provisioning attempts.
    pub fn refuse_provisions(&self, n: u32) {
        self.provision_refusals.store(n, Ordering::Release);
    }

    /// Number of provisioning attempts observed (refused ones included).
    pub fn provision_count(&self) -> u32 {
        self.provisions.load(Ordering::Acquire)
    }

    /// Number of requests whose processing started.
    pub fn processed_count(&self) -> u32 {
        self.processed.load(Ordering::Acquire)
    }

    fn next_script(&self) -> MockScript {
        self.scripts
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(MockScript::Stream {
                frames: vec![Vec::new()],
            })
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn provision(&self, resource: &ResourceUnit) -> Result<Arc<dyn SessionChannel>> {
        self.provisions.fetch_add(1, Ordering::AcqRel);
        let outstanding = self.provision_refusals.load(Ordering::Acquire);
        if outstanding > 0 {
            self.provision_refusals.store(outstanding - 1, Ordering::Release);
            debug!(%resource, "mock provisioning refused");
            return Err(SksError::Transport(format!(
                "provisioning refused for {resource}"
            )));
        }
        Ok(Arc::new(MockChannel {
            script: self.next_script(),
            cancelled: Arc::new(AtomicBool::new(false)),
            processed: Arc::clone(&self.processed),
        }))
    }
}

struct MockChannel {
    script: MockScript,
    cancelled: Arc<AtomicBool>,
    processed: Arc<AtomicU32>,
}

#[async_trait]
impl SessionChannel for MockChannel {
    async fn process(&self, _payload: Vec<u8>, callback: Arc<dyn SessionCallback>) -> Result<()> {
        self.processed.fetch_add(1, Ordering::AcqRel);
        let script = self.script.clone();
        let cancelled = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            drive_script(script, cancelled, callback).await;
        });
        Ok(())
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

async fn drive_script(
    script: MockScript,
    cancelled: Arc<AtomicBool>,
    callback: Arc<dyn SessionCallback>,
) {
    // Yield once so the submitting task returns before callbacks fire.
    tokio::task::yield_now().await;
    match script {
        MockScript::Stream { frames } => {
            callback.process_response(None, RespInfo::Stream);
            let frames = if frames.is_empty() {
                vec![Vec::new()]
            } else {
                frames
            };
            let count = frames.len();
            for (i, frame) in frames.into_iter().enumerate() {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let mut bytes = Vec::new();
                if i == 0 {
                    bytes.extend_from_slice(RESULT_MAGIC);
                }
                bytes.extend_from_slice(&frame);
                let last = i + 1 == count;
                callback.process_response_data(None, &bytes, last);
            }
        }
        MockScript::RespondError { code, msg } => {
            callback.process_response(None, RespInfo::Error { code, msg });
        }
        MockScript::DataError {
            good_frames,
            code,
            msg,
        } => {
            callback.process_response(None, RespInfo::Stream);
            for (i, frame) in good_frames.iter().enumerate() {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let mut bytes = Vec::new();
                if i == 0 {
                    bytes.extend_from_slice(RESULT_MAGIC);
                }
                bytes.extend_from_slice(frame);
                callback.process_response_data(None, &bytes, false);
            }
            callback.process_response_data(Some(ErrInfo { msg, code }), &[], false);
        }
        MockScript::CorruptFrame => {
            callback.process_response(None, RespInfo::Stream);
            if !cancelled.load(Ordering::Acquire) {
                // No magic header: a protocol violation.
                callback.process_response_data(None, b"garbage-frame", true);
            }
        }
        MockScript::Hang => {
            // Sit on the request until the channel is cancelled.
            while !cancelled.load(Ordering::Acquire) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
    }
}
