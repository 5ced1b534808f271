use std::sync::Arc;

use sks_catalog::Catalog;
use sks_common::{ChunkId, Result, SksError};
use sks_query::template::SqlWriter;
use sks_query::{QueryTemplate, SelectStmt, TableRef, parse_select};
use tracing::{debug, info};

use crate::context::{QueryContext, SpatialRestrictor};
use crate::mapping::{ChunkQuerySpec, ChunkSpec};
use crate::plugin::{Plan, PluginRegistry};

/// Chunk id used when a query touches no chunked table and still needs one
/// shard request to produce its rows.
pub const DUMMY_CHUNK_ID: ChunkId = 1_234_567_890;

/// Per-user-query analysis facade.
///
/// Drives parse, context initialization, the logical plugin phase, concrete
/// (parallel/merge) statement generation, and the physical plugin phase;
/// afterwards it renders chunk queries for the chunks the caller adds.
///
/// A failed analysis latches its error: later accessors return it instead
/// of stale results.
pub struct QuerySession {
    catalog: Arc<Catalog>,
    default_db: String,
    original: String,
    context: Option<QueryContext>,
    plan: Option<Plan>,
    error: Option<String>,
    chunks: Vec<ChunkSpec>,
}

impl QuerySession {
    /// Create a session bound to a catalog and the caller's default db.
    pub fn new(catalog: Arc<Catalog>, default_db: impl Into<String>) -> Self {
        Self {
            catalog,
            default_db: default_db.into(),
            original: String::new(),
            context: None,
            plan: None,
            error: None,
            chunks: Vec::new(),
        }
    }

    /// Analyze one user SELECT.
    pub fn analyze(&mut self, sql: &str) -> Result<()> {
        self.original = sql.to_string();
        self.context = None;
        self.plan = None;
        self.error = None;
        match self.run_pipeline(sql) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn run_pipeline(&mut self, sql: &str) -> Result<()> {
        let mut stmt = parse_select(sql)?;
        let mut ctx = QueryContext::new(self.default_db.clone(), Arc::clone(&self.catalog));
        let mut registry = PluginRegistry::standard();

        registry.apply_logical(&mut stmt, &mut ctx)?;
        let mut plan = Plan::new(stmt);
        registry.apply_physical(&mut plan, &mut ctx)?;
        ctx.query_mapping = Some(plan.query_mapping);

        info!(
            parallel = plan.stmt_parallel.len(),
            has_merge = plan.has_merge,
            chunked = plan.query_mapping.has_chunks,
            subchunked = plan.query_mapping.has_subchunks,
            "query analyzed"
        );
        self.context = Some(ctx);
        self.plan = Some(plan);
        Ok(())
    }

    /// The SQL text as submitted.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Latched analysis error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn checked_plan(&self) -> Result<&Plan> {
        if let Some(e) = &self.error {
            return Err(SksError::Analysis(e.clone()));
        }
        self.plan
            .as_ref()
            .ok_or_else(|| SksError::Bug("session used before analyze()".into()))
    }

    fn checked_context(&self) -> Result<&QueryContext> {
        if let Some(e) = &self.error {
            return Err(SksError::Analysis(e.clone()));
        }
        self.context
            .as_ref()
            .ok_or_else(|| SksError::Bug("session used before analyze()".into()))
    }

    /// Whether the merge statement does real work.
    pub fn needs_merge(&self) -> bool {
        self.context.as_ref().map(|c| c.needs_merge).unwrap_or(false)
    }

    /// Whether the query requires chunked dispatch.
    pub fn has_chunks(&self) -> bool {
        self.context.as_ref().map(|c| c.has_chunks()).unwrap_or(false)
    }

    /// Database whose partitioning drives dispatch.
    pub fn dominant_db(&self) -> Result<&str> {
        Ok(&self.checked_plan()?.dominant_db)
    }

    /// Spatial restrictors lifted from WHERE; input to chunk enumeration.
    pub fn restrictors(&self) -> Result<&[SpatialRestrictor]> {
        Ok(&self.checked_context()?.restrictors)
    }

    /// The master-side merge statement, when aggregation requires one.
    pub fn merge_stmt(&self) -> Result<Option<&SelectStmt>> {
        Ok(self.checked_plan()?.stmt_merge.as_ref())
    }

    /// Parallel statements, rendered (markers visible) for diagnostics.
    pub fn parallel_sql(&self) -> Result<Vec<String>> {
        Ok(self
            .checked_plan()?
            .stmt_parallel
            .iter()
            .map(|s| s.sql())
            .collect())
    }

    /// Add one chunk (with subchunks as appropriate) for dispatch.
    pub fn add_chunk(&mut self, spec: ChunkSpec) {
        debug!(chunk = spec.chunk_id, subchunks = spec.subchunks.len(), "add chunk");
        if let Some(ctx) = &mut self.context {
            ctx.chunk_count += 1;
        }
        self.chunks.push(spec);
    }

    /// Render each parallel statement into a template with typed holes.
    pub fn make_query_templates(&self) -> Result<Vec<QueryTemplate>> {
        let plan = self.checked_plan()?;
        Ok(plan
            .stmt_parallel
            .iter()
            .map(|stmt| {
                stmt.template_with(&|t: &TableRef, w: &mut SqlWriter| {
                    if !t.db.is_empty() {
                        w.push_str(&t.db);
                        w.push_str(".");
                    }
                    w.push_marked(&t.table);
                })
            })
            .collect())
    }

    /// Produce the ordered chunk-query sequence the dispatch layer consumes:
    /// ascending chunk id, subchunks ascending within one chunk.
    ///
    /// A query with no chunked table yields one spec under
    /// [`DUMMY_CHUNK_ID`].
    pub fn chunk_queries(&self) -> Result<Vec<ChunkQuerySpec>> {
        let plan = self.checked_plan()?;
        let templates = self.make_query_templates()?;
        let mapping = plan.query_mapping;
        let db = plan.dominant_db.clone();

        if !mapping.has_chunks {
            let spec = ChunkSpec::chunk(DUMMY_CHUNK_ID);
            return Ok(vec![ChunkQuerySpec {
                db: db.clone(),
                chunk_id: DUMMY_CHUNK_ID,
                subchunks: Vec::new(),
                queries: mapping.apply(&db, &templates, &spec)?,
            }]);
        }

        let mut chunks = self.chunks.clone();
        chunks.sort_by_key(|c| c.chunk_id);
        let mut out = Vec::with_capacity(chunks.len());
        for spec in &chunks {
            let queries = mapping.apply(&db, &templates, spec)?;
            let mut subchunks = spec.subchunks.clone();
            subchunks.sort_unstable();
            out.push(ChunkQuerySpec {
                db: db.clone(),
                chunk_id: spec.chunk_id,
                subchunks,
                queries,
            });
        }
        Ok(out)
    }
}
