use serde::{Deserialize, Serialize};

use sks_common::{ChunkId, Result, SubChunkId};
use sks_query::QueryTemplate;

/// One chunk to dispatch, with the subchunks to iterate when the query is
/// subchunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Chunk number.
    pub chunk_id: ChunkId,
    /// Subchunk numbers; empty for chunk-level queries.
    pub subchunks: Vec<SubChunkId>,
}

impl ChunkSpec {
    /// A chunk-level spec with no subchunks.
    pub fn chunk(chunk_id: ChunkId) -> Self {
        Self {
            chunk_id,
            subchunks: Vec::new(),
        }
    }

    /// A spec with explicit subchunks.
    pub fn with_subchunks(chunk_id: ChunkId, subchunks: Vec<SubChunkId>) -> Self {
        Self {
            chunk_id,
            subchunks,
        }
    }
}

/// One outbound shard request: every query string to run for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkQuerySpec {
    /// Database whose partitioning owns the chunk.
    pub db: String,
    /// Chunk number.
    pub chunk_id: ChunkId,
    /// Subchunks iterated by the queries, in ascending order.
    pub subchunks: Vec<SubChunkId>,
    /// Concrete SQL statements, in execution order.
    pub queries: Vec<String>,
}

/// Summary of the substitution a set of parallel templates requires,
/// produced by the Table plugin's physical phase.
///
/// The mapping turns a [`ChunkSpec`] into concrete SQL by rendering each
/// template per chunk (and per subchunk when subchunking was selected).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMapping {
    /// Whether any template substitutes chunk-level names.
    pub has_chunks: bool,
    /// Whether templates iterate subchunks (near-neighbor joins).
    pub has_subchunks: bool,
}

impl QueryMapping {
    /// Merge (union) another mapping into this one.
    pub fn union(&mut self, other: &QueryMapping) {
        self.has_chunks |= other.has_chunks;
        self.has_subchunks |= other.has_subchunks;
    }

    /// Render `templates` for one chunk spec.
    ///
    /// Subchunked mappings iterate subchunks in ascending order, rendering
    /// every template per subchunk; chunk-level mappings render each
    /// template once.
    pub fn apply(
        &self,
        db: &str,
        templates: &[QueryTemplate],
        spec: &ChunkSpec,
    ) -> Result<Vec<String>> {
        let mut queries = Vec::new();
        if self.has_subchunks {
            let mut subchunks = spec.subchunks.clone();
            subchunks.sort_unstable();
            for sub in subchunks {
                for t in templates {
                    queries.push(t.render(db, spec.chunk_id, Some(sub))?);
                }
            }
        } else {
            for t in templates {
                queries.push(t.render(db, spec.chunk_id, None)?);
            }
        }
        Ok(queries)
    }
}

/// Normalize a caller-supplied chunk list: ascending chunk order, one spec
/// per chunk (subchunk lists of duplicate entries merged), subchunks sorted
/// and deduplicated.
pub fn normalize_chunk_specs(specs: &[ChunkSpec]) -> Vec<ChunkSpec> {
    let mut merged: std::collections::BTreeMap<ChunkId, Vec<SubChunkId>> =
        std::collections::BTreeMap::new();
    for spec in specs {
        merged
            .entry(spec.chunk_id)
            .or_default()
            .extend_from_slice(&spec.subchunks);
    }
    merged
        .into_iter()
        .map(|(chunk_id, mut subchunks)| {
            subchunks.sort_unstable();
            subchunks.dedup();
            ChunkSpec {
                chunk_id,
                subchunks,
            }
        })
        .collect()
}

/// Split one spec into fragments whose subchunk lists hold at most
/// `max_subchunks` entries, preserving subchunk order. Chunk-level specs
/// pass through unsplit.
pub fn fragment_chunk_spec(spec: &ChunkSpec, max_subchunks: usize) -> Vec<ChunkSpec> {
    if spec.subchunks.len() <= max_subchunks || max_subchunks == 0 {
        return vec![spec.clone()];
    }
    spec.subchunks
        .chunks(max_subchunks)
        .map(|window| ChunkSpec::with_subchunks(spec.chunk_id, window.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sks_query::template::SqlWriter;

    fn chunk_template() -> QueryTemplate {
        let mut w = SqlWriter::new();
        w.push_str("SELECT ra FROM ");
        w.push_marked("Object_%CC%");
        w.finish()
    }

    fn subchunk_template() -> QueryTemplate {
        let mut w = SqlWriter::new();
        w.push_str("SELECT ra FROM ");
        w.push_marked("Object_%CC%_%SS%");
        w.finish()
    }

    #[test]
    fn chunk_level_mapping_renders_once_per_template() {
        let m = QueryMapping {
            has_chunks: true,
            has_subchunks: false,
        };
        let qs = m
            .apply("LSST", &[chunk_template()], &ChunkSpec::chunk(1234))
            .unwrap();
        assert_eq!(qs, vec!["SELECT ra FROM Object_1234".to_string()]);
    }

    #[test]
    fn subchunked_mapping_iterates_subchunks_ascending() {
        let m = QueryMapping {
            has_chunks: true,
            has_subchunks: true,
        };
        let qs = m
            .apply(
                "LSST",
                &[subchunk_template()],
                &ChunkSpec::with_subchunks(7, vec![3, 1]),
            )
            .unwrap();
        assert_eq!(
            qs,
            vec![
                "SELECT ra FROM Object_7_1".to_string(),
                "SELECT ra FROM Object_7_3".to_string(),
            ]
        );
    }

    #[test]
    fn normalize_merges_and_orders() {
        let specs = vec![
            ChunkSpec::with_subchunks(9, vec![3, 1]),
            ChunkSpec::chunk(2),
            ChunkSpec::with_subchunks(9, vec![1, 2]),
        ];
        let normalized = normalize_chunk_specs(&specs);
        assert_eq!(
            normalized,
            vec![
                ChunkSpec::chunk(2),
                ChunkSpec::with_subchunks(9, vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn fragmenter_splits_large_subchunk_lists() {
        let spec = ChunkSpec::with_subchunks(5, vec![1, 2, 3, 4, 5]);
        let frags = fragment_chunk_spec(&spec, 2);
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].subchunks, vec![1, 2]);
        assert_eq!(frags[2].subchunks, vec![5]);
        assert_eq!(fragment_chunk_spec(&spec, 0), vec![spec.clone()]);
        assert_eq!(fragment_chunk_spec(&ChunkSpec::chunk(9), 2).len(), 1);
    }
}
