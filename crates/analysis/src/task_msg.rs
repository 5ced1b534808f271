use serde::{Deserialize, Serialize};

use sks_common::{ChunkId, Result, SksError, SubChunkId};

use crate::mapping::ChunkQuerySpec;

/// One batch of queries over a shared subchunk set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFragment {
    /// Subchunks the queries iterate; empty at chunk level.
    pub subchunks: Vec<SubChunkId>,
    /// Concrete SQL statements.
    pub queries: Vec<String>,
}

/// Serialized payload of one per-chunk job, shipped to a worker through the
/// session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMsg {
    /// User query this job belongs to.
    pub query_id: u64,
    /// Job number within the user query.
    pub job_id: u32,
    /// Database whose partitioning owns the chunk.
    pub db: String,
    /// Chunk number.
    pub chunk_id: ChunkId,
    /// Worker-side table receiving this job's result rows.
    pub result_table: String,
    /// Query batches, in execution order.
    pub fragments: Vec<TaskFragment>,
}

impl TaskMsg {
    /// Build the payload for one chunk-query spec.
    pub fn from_chunk_query(
        query_id: u64,
        job_id: u32,
        result_table: impl Into<String>,
        spec: &ChunkQuerySpec,
    ) -> Self {
        Self {
            query_id,
            job_id,
            db: spec.db.clone(),
            chunk_id: spec.chunk_id,
            result_table: result_table.into(),
            fragments: vec![TaskFragment {
                subchunks: spec.subchunks.clone(),
                queries: spec.queries.clone(),
            }],
        }
    }

    /// Serialize to payload bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SksError::Payload(format!("encode task: {e}")))
    }

    /// Decode payload bytes; used by the mock session service and tests.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SksError::Payload(format!("decode task: {e}")))
    }

    /// Structural verification before dispatch: a payload must carry at
    /// least one fragment with at least one query.
    pub fn verify(&self) -> Result<()> {
        if self.fragments.is_empty() || self.fragments.iter().any(|f| f.queries.is_empty()) {
            return Err(SksError::Payload(format!(
                "task for chunk {} has no queries",
                self.chunk_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let spec = ChunkQuerySpec {
            db: "LSST".into(),
            chunk_id: 1234,
            subchunks: vec![1, 2],
            queries: vec!["SELECT 1".into()],
        };
        let msg = TaskMsg::from_chunk_query(7, 3, "r_7", &spec);
        let bytes = msg.serialize().unwrap();
        assert_eq!(TaskMsg::deserialize(&bytes).unwrap(), msg);
        msg.verify().unwrap();
    }

    #[test]
    fn verify_rejects_empty_fragments() {
        let msg = TaskMsg {
            query_id: 1,
            job_id: 1,
            db: "LSST".into(),
            chunk_id: 5,
            result_table: "r".into(),
            fragments: vec![],
        };
        assert!(msg.verify().is_err());
    }
}
