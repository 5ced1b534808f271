use sks_catalog::TableInfo;
use sks_common::{Result, SksError};
use sks_query::{
    BoolTerm, ColumnRef, CompareOp, DbTablePair, JoinSpec, SelectStmt, TableRef, ValueExpr,
    ValueFactor,
};
use tracing::{debug, trace};

use crate::context::QueryContext;
use crate::mapping::QueryMapping;
use crate::plugin::{Plan, QueryPlugin};

// Substitution markers understood by the template splitter.
const CHUNK_TAG: &str = "%CC%";
const SUBCHUNK_TAG: &str = "%SS%";

/// Confines table-name references to the FROM list and rewrites FROM for
/// chunked dispatch.
///
/// Logical phase: fills in default databases, installs generated aliases,
/// and patches every other clause to refer to aliases, so that the later
/// table-name substitution only ever touches the FROM list.
///
/// Physical phase: consults the metadata catalog to decide chunking,
/// subchunking, and overlap requirements, and rewrites FROM table names to
/// substitutable forms, cloning the statement once per overlap permutation.
pub struct TablePlugin {
    dominant_db: String,
}

impl TablePlugin {
    pub fn new() -> Self {
        Self {
            dominant_db: String::new(),
        }
    }
}

impl Default for TablePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for TablePlugin {
    fn name(&self) -> &'static str {
        "Table"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        if stmt.from.is_empty() {
            return Err(SksError::Analysis("query has no FROM list".into()));
        }

        // Default-db fill-in; the first (db, table) pair becomes the
        // dominant db / anonymous table.
        let mut first: Option<DbTablePair> = None;
        let default_db = ctx.default_db.clone();
        let mut bad_ref = false;
        stmt.for_each_table_ref_mut(&mut |t| {
            if t.table.is_empty() {
                bad_ref = true;
                return;
            }
            if t.db.is_empty() {
                t.db = default_db.clone();
            }
            if first.is_none() {
                first = Some(DbTablePair::new(&t.db, &t.table));
            }
        });
        if bad_ref {
            return Err(SksError::Bug("table reference with no table name".into()));
        }
        let first = first.expect("non-empty FROM checked above");
        self.dominant_db = first.db.clone();
        ctx.dominant_db = first.db;
        ctx.anonymous_table = first.table;
        ctx.resolver_tables = stmt
            .all_table_refs()
            .iter()
            .map(|t| DbTablePair::new(&t.db, &t.table))
            .collect();

        // Install generated aliases where missing and register every
        // (db, table, alias) triple in both alias directions.
        let mut seq = 0;
        let aliases = &mut ctx.aliases;
        stmt.for_each_table_ref_mut(&mut |t| {
            if t.alias.is_empty() {
                seq += 1;
                t.alias = format!("QST_{seq}_");
            }
            aliases.set(&t.db, &t.table, &t.alias);
        });

        // Patch column references (and qualified stars) in every clause
        // that may name tables, so only FROM holds real table names.
        let default_db = ctx.default_db.clone();
        let aliases = ctx.aliases.clone();
        stmt.for_each_value_expr_mut(&mut |e: &mut ValueExpr| {
            e.for_each_factor_mut(&mut |f| match f {
                ValueFactor::ColumnRef(c) => {
                    if c.table.is_empty() {
                        return;
                    }
                    let effective_db = if c.db.is_empty() { &default_db } else { &c.db };
                    if let Some(alias) = aliases.alias_for(effective_db, &c.table) {
                        c.db.clear();
                        c.table = alias.to_string();
                    }
                }
                ValueFactor::Star(Some(q)) => {
                    // Only table.* is supported; db.table.* passes through.
                    if q.contains('.') {
                        trace!(star = %q, "db-qualified star left unrewritten");
                        return;
                    }
                    if let Some(alias) = aliases.alias_for(&default_db, q) {
                        *q = alias.to_string();
                    }
                }
                _ => {}
            });
        });
        Ok(())
    }

    fn apply_physical(&mut self, plan: &mut Plan, ctx: &mut QueryContext) -> Result<()> {
        if plan.stmt_original.select_list.is_empty() {
            return Err(SksError::Bug("original statement has no select list".into()));
        }
        plan.dominant_db = self.dominant_db.clone();

        let stmts = std::mem::take(&mut plan.stmt_parallel);
        let mut out = Vec::new();
        for mut stmt in stmts {
            let (replacements, mapping) = rewrite_tables(&mut stmt, ctx)?;
            plan.query_mapping.union(&mapping);
            if replacements.is_empty() {
                out.push(stmt);
            } else {
                out.extend(replacements);
            }
        }
        plan.stmt_parallel = out;
        Ok(())
    }
}

// Per-reference chunking classification, in FROM traversal order.
struct RefInfo {
    key: DbTablePair,
    alias: String,
    chunked: bool,
    // Only directors can subchunk and materialize overlap.
    director: bool,
    is_match: bool,
    match_directors: Option<(DbTablePair, DbTablePair)>,
}

/// Rewrite FROM table names of one parallel statement for chunked dispatch.
///
/// Returns the replacement statements (one per permutation) when overlap
/// permutations are required, or an empty list when the statement was
/// edited in place, plus the chunk substitution this statement needs.
fn rewrite_tables(
    stmt: &mut SelectStmt,
    ctx: &QueryContext,
) -> Result<(Vec<SelectStmt>, QueryMapping)> {
    let refs = classify_refs(stmt, ctx);
    let chunked: Vec<usize> = refs
        .iter()
        .enumerate()
        .filter(|(_, r)| r.chunked)
        .map(|(i, _)| i)
        .collect();

    if chunked.is_empty() {
        return Ok((Vec::new(), QueryMapping::default()));
    }

    let pairs = equi_pairs(stmt);
    // Subchunking is selected when some pair of chunked tables is not
    // joined on admissible director keys (a near-neighbor join).
    let mut subchunked = false;
    for (a, i) in chunked.iter().enumerate() {
        for j in chunked.iter().skip(a + 1) {
            if !admissible_join(&refs[*i], &refs[*j], ctx, &pairs) {
                subchunked = true;
            }
        }
    }

    let mapping = QueryMapping {
        has_chunks: true,
        has_subchunks: subchunked,
    };

    // Rendering decision per reference index, for the base permutation.
    let mut base: Vec<Option<String>> = vec![None; refs.len()];
    for &i in &chunked {
        let r = &refs[i];
        base[i] = Some(if subchunked && r.director {
            format!("{}_{}_{}", r.key.table, CHUNK_TAG, SUBCHUNK_TAG)
        } else {
            format!("{}_{}", r.key.table, CHUNK_TAG)
        });
    }

    if !subchunked {
        // A match table joined with one of its directors reads the
        // director side from the chunk's full-overlap table, because match
        // rows stored in this chunk may reference director rows that live
        // in the chunk's overlap.
        for &i in &chunked {
            if !refs[i].director {
                continue;
            }
            let joined_to_own_match = chunked.iter().any(|&j| {
                j != i
                    && refs[j].is_match
                    && refs[j]
                        .match_directors
                        .as_ref()
                        .map(|(d1, d2)| *d1 == refs[i].key || *d2 == refs[i].key)
                        .unwrap_or(false)
                    && admissible_join(&refs[i], &refs[j], ctx, &pairs)
            });
            if joined_to_own_match {
                base[i] = Some(format!("%OV:{}%", refs[i].key.table));
            }
        }
        apply_decisions(stmt, &base);
        debug!(permutations = 1, subchunked, "table rewrite");
        return Ok((Vec::new(), mapping));
    }

    // Near-neighbor join: the base permutation reads subchunks everywhere;
    // each director beyond the first contributes one permutation where it
    // reads the overlap table instead.
    let directors: Vec<usize> = chunked
        .iter()
        .copied()
        .filter(|&i| refs[i].director)
        .collect();
    let mut permutations = vec![base.clone()];
    for &i in directors.iter().skip(1) {
        let mut p = base.clone();
        p[i] = Some(format!("%OV:{}%", refs[i].key.table));
        permutations.push(p);
    }

    debug!(permutations = permutations.len(), subchunked, "table rewrite");
    if permutations.len() == 1 {
        apply_decisions(stmt, &permutations[0]);
        return Ok((Vec::new(), mapping));
    }
    let mut out = Vec::with_capacity(permutations.len());
    for p in &permutations {
        // Filter-copy: clone preserves the join syntax; only FROM table
        // names change.
        let mut clone = stmt.clone();
        apply_decisions(&mut clone, p);
        out.push(clone);
    }
    Ok((out, mapping))
}

fn classify_refs(stmt: &SelectStmt, ctx: &QueryContext) -> Vec<RefInfo> {
    stmt.all_table_refs()
        .iter()
        .map(|t| {
            let info = ctx.catalog.lookup(&t.db, &t.table);
            RefInfo {
                key: DbTablePair::new(&t.db, &t.table),
                alias: t.alias.clone(),
                chunked: info.map(|i| i.is_chunked()).unwrap_or(false),
                director: matches!(info, Some(TableInfo::Director(_))),
                is_match: matches!(info, Some(TableInfo::Match(_))),
                match_directors: match info {
                    Some(TableInfo::Match(m)) => Some(m.directors.clone()),
                    _ => None,
                },
            }
        })
        .collect()
}

// Apply per-reference name decisions in FROM traversal order. Chunked
// names lose their db qualifier; the db travels in the chunk-query spec.
fn apply_decisions(stmt: &mut SelectStmt, decisions: &[Option<String>]) {
    let mut idx = 0;
    stmt.for_each_table_ref_mut(&mut |t: &mut TableRef| {
        if let Some(Some(name)) = decisions.get(idx) {
            t.table = name.clone();
            t.db.clear();
        }
        idx += 1;
    });
}

// Collect (left, right) column pairs from top-level equality predicates in
// WHERE and in the ON clause of every join.
fn equi_pairs(stmt: &SelectStmt) -> Vec<(ColumnRef, ColumnRef)> {
    let mut pairs = Vec::new();
    let mut collect_term = |term: &BoolTerm, pairs: &mut Vec<(ColumnRef, ColumnRef)>| {
        let conjuncts: Vec<&BoolTerm> = match term {
            BoolTerm::And(ts) => ts.iter().collect(),
            other => vec![other],
        };
        for c in conjuncts {
            if let BoolTerm::Compare {
                left,
                op: CompareOp::Eq,
                right,
            } = c
            {
                if let (Some(l), Some(r)) = (single_column(left), single_column(right)) {
                    pairs.push((l.clone(), r.clone()));
                }
            }
        }
    };
    if let Some(w) = &stmt.where_clause {
        collect_term(w, &mut pairs);
    }
    fn walk_joins(
        t: &TableRef,
        pairs: &mut Vec<(ColumnRef, ColumnRef)>,
        collect: &mut dyn FnMut(&BoolTerm, &mut Vec<(ColumnRef, ColumnRef)>),
    ) {
        for j in &t.joins {
            if let Some(JoinSpec::On(term)) = &j.spec {
                collect(term, pairs);
            }
            walk_joins(&j.right, pairs, collect);
        }
    }
    for t in &stmt.from {
        walk_joins(t, &mut pairs, &mut collect_term);
    }
    pairs
}

fn single_column(e: &ValueExpr) -> Option<&ColumnRef> {
    if !e.ops.is_empty() {
        return None;
    }
    match &e.factor {
        ValueFactor::ColumnRef(c) => Some(c),
        _ => None,
    }
}

// Two chunked references are admissibly joined when some equality predicate
// relates one's admissible join columns to the other's (director primary
// keys and the foreign keys referencing them).
fn admissible_join(
    a: &RefInfo,
    b: &RefInfo,
    ctx: &QueryContext,
    pairs: &[(ColumnRef, ColumnRef)],
) -> bool {
    let cols_a = join_cols(a, ctx);
    let cols_b = join_cols(b, ctx);
    pairs.iter().any(|(l, r)| {
        (cols_a.contains(l) && cols_b.contains(r)) || (cols_a.contains(r) && cols_b.contains(l))
    })
}

fn join_cols(r: &RefInfo, ctx: &QueryContext) -> Vec<ColumnRef> {
    ctx.catalog
        .lookup(&r.key.db, &r.key.table)
        .map(|info| info.join_columns(&r.alias))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sks_catalog::{Catalog, ChildTableInfo, DirTableInfo, MatchTableInfo};
    use sks_query::parse_select;

    use super::*;

    fn test_catalog() -> Arc<Catalog> {
        let mut cat = Catalog::new();
        cat.insert(TableInfo::Director(DirTableInfo {
            database: "LSST".into(),
            table: "Object".into(),
            pk: "objectId".into(),
            lon: "ra".into(),
            lat: "decl".into(),
            partitioning_id: 1,
        }));
        cat.insert(TableInfo::Director(DirTableInfo {
            database: "LSST".into(),
            table: "Galaxy".into(),
            pk: "galaxyId".into(),
            lon: "ra".into(),
            lat: "decl".into(),
            partitioning_id: 1,
        }));
        cat.insert(TableInfo::Child(ChildTableInfo {
            database: "LSST".into(),
            table: "Source".into(),
            fk: "objectId".into(),
            director: DbTablePair::new("LSST", "Object"),
        }));
        cat.insert(TableInfo::Match(MatchTableInfo {
            database: "LSST".into(),
            table: "ObjGalMatch".into(),
            fk: ("objectId".into(), "galaxyId".into()),
            directors: (
                DbTablePair::new("LSST", "Object"),
                DbTablePair::new("LSST", "Galaxy"),
            ),
        }));
        cat.validate().unwrap();
        Arc::new(cat)
    }

    fn analyzed(sql: &str) -> (SelectStmt, QueryContext) {
        let mut stmt = parse_select(sql).unwrap();
        let mut ctx = QueryContext::new("LSST", test_catalog());
        let mut plugin = TablePlugin::new();
        plugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        (stmt, ctx)
    }

    #[test]
    fn logical_phase_installs_aliases_and_rewrites_columns() {
        let (stmt, ctx) = analyzed("SELECT ra, Object.decl FROM Object WHERE Object.flux > 5");
        assert_eq!(stmt.from[0].alias, "QST_1_");
        assert_eq!(ctx.dominant_db, "LSST");
        assert_eq!(ctx.anonymous_table, "Object");
        assert_eq!(ctx.aliases.alias_for("LSST", "Object"), Some("QST_1_"));
        // Qualified column now names the alias, with no db.
        assert_eq!(
            stmt.select_list[1].factor,
            ValueFactor::column("", "QST_1_", "decl")
        );
        match &stmt.where_clause {
            Some(BoolTerm::Compare { left, .. }) => {
                assert_eq!(left.factor, ValueFactor::column("", "QST_1_", "flux"));
            }
            other => panic!("unexpected where: {other:?}"),
        }
    }

    #[test]
    fn logical_phase_preserves_user_aliases() {
        let (stmt, ctx) = analyzed("SELECT o.ra FROM Object o");
        assert_eq!(stmt.from[0].alias, "o");
        assert_eq!(ctx.aliases.alias_for("LSST", "Object"), Some("o"));
        assert_eq!(stmt.select_list[0].factor, ValueFactor::column("", "o", "ra"));
    }

    #[test]
    fn single_chunked_table_gets_chunk_name() {
        let (stmt, mut ctx) = analyzed("SELECT ra FROM Object");
        let mut plan = Plan::new(stmt);
        let mut plugin = TablePlugin::new();
        plugin.dominant_db = "LSST".into();
        plugin.apply_physical(&mut plan, &mut ctx).unwrap();
        assert_eq!(plan.stmt_parallel.len(), 1);
        assert!(plan.query_mapping.has_chunks);
        assert!(!plan.query_mapping.has_subchunks);
        assert_eq!(plan.stmt_parallel[0].from[0].table, "Object_%CC%");
        assert!(plan.stmt_parallel[0].from[0].db.is_empty());
    }

    #[test]
    fn replicated_only_query_is_unchunked() {
        let (stmt, mut ctx) = analyzed("SELECT * FROM Filter");
        let mut plan = Plan::new(stmt);
        let mut plugin = TablePlugin::new();
        plugin.apply_physical(&mut plan, &mut ctx).unwrap();
        assert!(!plan.query_mapping.has_chunks);
        assert_eq!(plan.stmt_parallel[0].from[0].table, "Filter");
    }

    #[test]
    fn near_neighbor_self_join_selects_subchunking_with_one_overlap_permutation() {
        let (stmt, mut ctx) = analyzed(
            "SELECT o1.objectId, o2.objectId FROM Object o1, Object o2 \
             WHERE scisql_angSep(o1.ra, o1.decl, o2.ra, o2.decl) < 0.01",
        );
        let mut plan = Plan::new(stmt);
        let mut plugin = TablePlugin::new();
        plugin.apply_physical(&mut plan, &mut ctx).unwrap();
        assert!(plan.query_mapping.has_subchunks);
        // Base permutation plus exactly one overlap permutation.
        assert_eq!(plan.stmt_parallel.len(), 2);
        assert_eq!(plan.stmt_parallel[0].from[0].table, "Object_%CC%_%SS%");
        assert_eq!(plan.stmt_parallel[0].from[1].table, "Object_%CC%_%SS%");
        assert_eq!(plan.stmt_parallel[1].from[0].table, "Object_%CC%_%SS%");
        assert_eq!(plan.stmt_parallel[1].from[1].table, "%OV:Object%");
    }

    #[test]
    fn key_equi_join_avoids_subchunking() {
        let (stmt, mut ctx) = analyzed(
            "SELECT o.ra FROM Object o, Source s WHERE o.objectId = s.objectId",
        );
        let mut plan = Plan::new(stmt);
        let mut plugin = TablePlugin::new();
        plugin.apply_physical(&mut plan, &mut ctx).unwrap();
        assert!(plan.query_mapping.has_chunks);
        assert!(!plan.query_mapping.has_subchunks);
        assert_eq!(plan.stmt_parallel.len(), 1);
        assert_eq!(plan.stmt_parallel[0].from[0].table, "Object_%CC%");
        assert_eq!(plan.stmt_parallel[0].from[1].table, "Source_%CC%");
    }

    #[test]
    fn match_director_join_uses_director_overlap() {
        let (stmt, mut ctx) = analyzed(
            "SELECT o.ra FROM ObjGalMatch m INNER JOIN Object o ON m.objectId = o.objectId",
        );
        let mut plan = Plan::new(stmt);
        let mut plugin = TablePlugin::new();
        plugin.apply_physical(&mut plan, &mut ctx).unwrap();
        assert!(!plan.query_mapping.has_subchunks);
        assert_eq!(plan.stmt_parallel.len(), 1);
        let stmt = &plan.stmt_parallel[0];
        assert_eq!(stmt.from[0].table, "ObjGalMatch_%CC%");
        assert_eq!(stmt.from[0].joins[0].right.table, "%OV:Object%");
    }
}
