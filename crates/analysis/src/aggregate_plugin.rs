use sks_common::{Result, SksError};
use sks_query::{FuncExpr, SelectStmt, ValueExpr, ValueFactor};
use tracing::debug;

use crate::context::QueryContext;
use crate::plugin::{Plan, QueryPlugin};

/// Splits aggregate queries into partial (per-shard) and combining
/// (master-side) select lists.
///
/// A select list with no aggregate calls leaves the merge as a pass-through
/// concatenation. Otherwise each aggregate is decomposed into partials the
/// workers can compute independently (`AVG` becomes a `SUM`/`COUNT` pair)
/// and the merge statement combines them; post-aggregation modifiers
/// (HAVING, ORDER BY, LIMIT) move to the merge statement.
pub struct AggregatePlugin;

impl AggregatePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AggregatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for AggregatePlugin {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn apply_logical(&mut self, _stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    fn apply_physical(&mut self, plan: &mut Plan, ctx: &mut QueryContext) -> Result<()> {
        if !plan.stmt_original.has_aggregate() {
            plan.has_merge = false;
            plan.stmt_merge = None;
            ctx.needs_merge = false;
            return Ok(());
        }

        let split = split_select_list(&plan.stmt_original.select_list)?;

        for stmt in &mut plan.stmt_parallel {
            stmt.select_list = split.parallel.clone();
            // Post-aggregation modifiers run on the merge side only.
            stmt.having = None;
            stmt.order_by.clear();
            stmt.limit = None;
        }

        let mut merge = plan.stmt_original.copy_merge();
        merge.select_list = split.merge;
        for e in &mut merge.group_by {
            strip_qualifiers(e);
        }
        if let Some(h) = &mut merge.having {
            h.for_each_value_expr_mut(&mut strip_qualifiers);
        }
        for o in &mut merge.order_by {
            strip_qualifiers(&mut o.expr);
        }
        debug!(parallel_items = split.parallel_len, "aggregate split");
        plan.stmt_merge = Some(merge);
        plan.has_merge = true;
        ctx.needs_merge = true;
        Ok(())
    }
}

struct SplitLists {
    parallel: Vec<ValueExpr>,
    merge: Vec<ValueExpr>,
    parallel_len: usize,
}

fn split_select_list(items: &[ValueExpr]) -> Result<SplitLists> {
    let mut parallel = Vec::new();
    let mut merge = Vec::new();
    let mut seq = 0;
    for item in items {
        if !item.has_aggregate() {
            // Group keys pass through; the merge side addresses them by
            // their output column name.
            parallel.push(item.clone());
            let mut m = item.clone();
            strip_qualifiers(&mut m);
            merge.push(m);
            continue;
        }
        let func = match (&item.factor, item.ops.is_empty()) {
            (ValueFactor::AggFunc(f), true) => f,
            _ => {
                return Err(SksError::Unsupported(format!(
                    "aggregate expression too complex to split: {item}"
                )));
            }
        };
        seq += 1;
        match func.name.to_ascii_uppercase().as_str() {
            "AVG" => {
                let sum_name = format!("_s{seq}");
                let count_name = format!("_c{seq}");
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(FuncExpr::new("SUM", func.args.clone())),
                    &sum_name,
                ));
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(FuncExpr::new("COUNT", func.args.clone())),
                    &count_name,
                ));
                let mut combined = ValueExpr::from_factor(ValueFactor::AggFunc(FuncExpr::new(
                    "SUM",
                    vec![ValueExpr::from_factor(ValueFactor::column(
                        "", "", &sum_name,
                    ))],
                )));
                combined.ops.push(sks_query::FactorOp {
                    op: sks_query::ArithOp::Divide,
                    factor: ValueFactor::AggFunc(FuncExpr::new(
                        "SUM",
                        vec![ValueExpr::from_factor(ValueFactor::column(
                            "",
                            "",
                            &count_name,
                        ))],
                    )),
                });
                combined.alias = item.alias.clone();
                merge.push(combined);
            }
            "COUNT" => {
                let name = format!("_c{seq}");
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(func.clone()),
                    &name,
                ));
                merge.push(combine("SUM", &name, item.alias.clone()));
            }
            "SUM" => {
                let name = format!("_s{seq}");
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(func.clone()),
                    &name,
                ));
                merge.push(combine("SUM", &name, item.alias.clone()));
            }
            "MIN" => {
                let name = format!("_m{seq}");
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(func.clone()),
                    &name,
                ));
                merge.push(combine("MIN", &name, item.alias.clone()));
            }
            "MAX" => {
                let name = format!("_x{seq}");
                parallel.push(ValueExpr::aliased(
                    ValueFactor::AggFunc(func.clone()),
                    &name,
                ));
                merge.push(combine("MAX", &name, item.alias.clone()));
            }
            other => {
                return Err(SksError::Unsupported(format!(
                    "aggregate function not supported: {other}"
                )));
            }
        }
    }
    let parallel_len = parallel.len();
    Ok(SplitLists {
        parallel,
        merge,
        parallel_len,
    })
}

fn combine(func: &str, column: &str, alias: Option<String>) -> ValueExpr {
    let mut e = ValueExpr::from_factor(ValueFactor::AggFunc(FuncExpr::new(
        func,
        vec![ValueExpr::from_factor(ValueFactor::column("", "", column))],
    )));
    e.alias = alias;
    e
}

// Merge-side expressions address the flat merge table; table/db qualifiers
// from the parallel side are meaningless there.
fn strip_qualifiers(e: &mut ValueExpr) {
    e.for_each_factor_mut(&mut |f| {
        if let ValueFactor::ColumnRef(c) = f {
            c.db.clear();
            c.table.clear();
        }
    });
}
