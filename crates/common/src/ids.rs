//! Typed identifiers shared across analysis/dispatch components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable user-query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable per-chunk job identifier within one user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(
    /// Raw numeric id value.
    pub u32,
);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Spatial chunk number of a partitioned director table.
pub type ChunkId = i32;

/// Subchunk number within one chunk.
pub type SubChunkId = i32;

/// Render the `QID=<q>;<job>` prefix used to correlate log lines belonging
/// to one job of one user query.
pub fn query_id_str(query_id: QueryId, job_id: Option<JobId>) -> String {
    match job_id {
        Some(job) => format!("QID={};{}", query_id, job),
        None => format!("QID={}", query_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_str_forms() {
        assert_eq!(query_id_str(QueryId(7), None), "QID=7");
        assert_eq!(query_id_str(QueryId(7), Some(JobId(3))), "QID=7;3");
    }
}
