use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sks_common::metrics::global_metrics;
use sks_common::{JobId, Result, SksError};
use tracing::{debug, warn};

use crate::response_handler::{ERR_CODE_CORRUPT, HandlerError, ResponseHandler};

/// Marker leading the first frame of every result stream. A first frame
/// without it is a protocol violation, not a merge refusal.
pub const RESULT_MAGIC: &[u8; 4] = b"SKSR";

// Accumulated bytes past which a response is flagged as a large result.
const LARGE_RESULT_BYTES: u64 = 1 << 20;

// Default receive slab size.
const BUFFER_SIZE: usize = 64 * 1024;

/// Master-side merge store: concatenates streamed result blocks per chunk
/// result table, then hands the collected rows to the merge statement.
#[derive(Debug)]
pub struct InfileMerger {
    query_id: String,
    merge_sql: Option<String>,
    tables: Mutex<HashMap<String, Vec<u8>>>,
    finalized: AtomicBool,
    bytes_merged: AtomicU64,
}

impl InfileMerger {
    /// Create a merge store for one user query. `merge_sql` is the
    /// combining statement, when aggregation requires one.
    pub fn new(query_id: impl Into<String>, merge_sql: Option<String>) -> Self {
        Self {
            query_id: query_id.into(),
            merge_sql,
            tables: Mutex::new(HashMap::new()),
            finalized: AtomicBool::new(false),
            bytes_merged: AtomicU64::new(0),
        }
    }

    /// Append one block for `table`. Refused after finalize.
    pub fn merge(&self, table: &str, bytes: &[u8]) -> bool {
        if self.finalized.load(Ordering::Acquire) {
            warn!(table, "merge refused: merger already finalized");
            return false;
        }
        let mut tables = self.tables.lock().expect("merge lock");
        tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(bytes);
        self.bytes_merged
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        global_metrics().record_merged_bytes(&self.query_id, bytes.len() as u64);
        true
    }

    /// Drop the partial rows of `table` (before a retry re-streams them).
    pub fn scrub(&self, table: &str) {
        self.tables.lock().expect("merge lock").remove(table);
    }

    /// Close the merge store. Later merges are refused; the caller runs
    /// the merge statement over the collected rows.
    pub fn finalize(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(SksError::Merge("merger finalized twice".into()));
        }
        debug!(
            tables = self.tables.lock().expect("merge lock").len(),
            bytes = self.bytes_merged.load(Ordering::Relaxed),
            "merger finalized"
        );
        Ok(())
    }

    /// Whether finalize ran.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// The combining statement, when one exists.
    pub fn merge_sql(&self) -> Option<&str> {
        self.merge_sql.as_deref()
    }

    /// Total bytes accepted.
    pub fn bytes_merged(&self) -> u64 {
        self.bytes_merged.load(Ordering::Relaxed)
    }

    /// Collected rows of one result table.
    pub fn table_bytes(&self, table: &str) -> Option<Vec<u8>> {
        self.tables.lock().expect("merge lock").get(table).cloned()
    }
}

/// [`ResponseHandler`] that feeds streamed blocks into an [`InfileMerger`].
///
/// The first frame of every attempt must open with [`RESULT_MAGIC`]; the
/// marker is stripped before the block reaches the merge store.
pub struct MergingHandler {
    merger: Arc<InfileMerger>,
    result_table: String,
    buffer: Arc<Mutex<Vec<u8>>>,
    error: Mutex<Option<HandlerError>>,
    first_frame_done: AtomicBool,
    flushed_bytes: AtomicU64,
    is_finished: AtomicBool,
    cancelled: AtomicBool,
}

impl MergingHandler {
    /// Create a handler writing into `result_table` of `merger`.
    pub fn new(merger: Arc<InfileMerger>, result_table: impl Into<String>) -> Self {
        Self {
            merger,
            result_table: result_table.into(),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(BUFFER_SIZE))),
            error: Mutex::new(None),
            first_frame_done: AtomicBool::new(false),
            flushed_bytes: AtomicU64::new(0),
            is_finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    fn set_error(&self, code: i32, msg: impl Into<String>) {
        let mut e = self.error.lock().expect("error lock");
        if e.is_none() {
            *e = Some(HandlerError {
                code,
                msg: msg.into(),
            });
        }
    }
}

impl ResponseHandler for MergingHandler {
    fn next_buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }

    fn next_buffer_size(&self) -> usize {
        BUFFER_SIZE
    }

    fn flush(&self, len: usize, last: bool, large_result: &mut bool) -> bool {
        let buffer = self.buffer.lock().expect("buffer lock");
        let mut block: &[u8] = &buffer[..len.min(buffer.len())];
        if !self.first_frame_done.swap(true, Ordering::AcqRel) {
            if !block.starts_with(RESULT_MAGIC) {
                self.set_error(
                    ERR_CODE_CORRUPT,
                    format!("result stream for {} lacks magic header", self.result_table),
                );
                return false;
            }
            block = &block[RESULT_MAGIC.len()..];
        }
        if !self.merger.merge(&self.result_table, block) {
            self.set_error(-1, format!("merge refused block for {}", self.result_table));
            return false;
        }
        let total = self
            .flushed_bytes
            .fetch_add(block.len() as u64, Ordering::Relaxed)
            + block.len() as u64;
        *large_result = total > LARGE_RESULT_BYTES;
        if last {
            self.is_finished.store(true, Ordering::Release);
        }
        true
    }

    fn error_flush(&self, msg: &str, code: i32) {
        debug!(table = %self.result_table, code, msg, "error flush");
        self.set_error(code, msg);
    }

    fn finished(&self) -> bool {
        self.is_finished.load(Ordering::Acquire)
    }

    fn reset(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.merger.scrub(&self.result_table);
        self.buffer.lock().expect("buffer lock").clear();
        *self.error.lock().expect("error lock") = None;
        self.first_frame_done.store(false, Ordering::Release);
        self.flushed_bytes.store(0, Ordering::Release);
        self.is_finished.store(false, Ordering::Release);
        true
    }

    fn process_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn get_error(&self) -> Option<HandlerError> {
        self.error.lock().expect("error lock").clone()
    }

    fn prep_scrub_results(&self, _job_id: JobId, _attempt: u32) -> bool {
        self.merger.scrub(&self.result_table);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (Arc<InfileMerger>, MergingHandler) {
        let merger = Arc::new(InfileMerger::new("1", None));
        let h = MergingHandler::new(Arc::clone(&merger), "r_1");
        (merger, h)
    }

    fn push(h: &MergingHandler, bytes: &[u8], last: bool) -> bool {
        {
            let buf_arc = h.next_buffer();
            let mut buf = buf_arc.lock().unwrap();
            buf.clear();
            buf.extend_from_slice(bytes);
        }
        let mut large = false;
        h.flush(bytes.len(), last, &mut large)
    }

    #[test]
    fn merges_blocks_after_magic() {
        let (merger, h) = handler();
        let mut first = RESULT_MAGIC.to_vec();
        first.extend_from_slice(b"row1\n");
        assert!(push(&h, &first, false));
        assert!(push(&h, b"row2\n", true));
        assert!(h.finished());
        assert_eq!(merger.table_bytes("r_1").unwrap(), b"row1\nrow2\n");
    }

    #[test]
    fn missing_magic_is_corrupt() {
        let (_merger, h) = handler();
        assert!(!push(&h, b"not-magic", false));
        assert_eq!(h.get_error().unwrap().code, ERR_CODE_CORRUPT);
    }

    #[test]
    fn reset_scrubs_and_clears() {
        let (merger, h) = handler();
        let mut first = RESULT_MAGIC.to_vec();
        first.extend_from_slice(b"partial");
        assert!(push(&h, &first, false));
        assert!(h.reset());
        assert!(merger.table_bytes("r_1").is_none());
        assert!(h.get_error().is_none());
        // A retried stream needs the magic again.
        assert!(!push(&h, b"partial", false));
    }

    #[test]
    fn reset_after_cancel_is_refused() {
        let (_merger, h) = handler();
        h.process_cancel();
        assert!(!h.reset());
    }

    #[test]
    fn finalized_merger_refuses_blocks() {
        let (merger, h) = handler();
        merger.finalize().unwrap();
        assert!(merger.finalize().is_err());
        let mut first = RESULT_MAGIC.to_vec();
        first.extend_from_slice(b"x");
        assert!(!push(&h, &first, false));
    }
}
