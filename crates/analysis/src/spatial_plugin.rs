use sks_common::Result;
use sks_query::{BoolTerm, SelectStmt};
use tracing::debug;

use crate::context::{QueryContext, SpatialRestrictor};
use crate::plugin::{Plan, QueryPlugin};

// Restrictor functions recognized in WHERE. The argument lists differ per
// shape; the analysis layer treats them as opaque parameter strings.
const RESTRICTOR_PREFIX: &str = "qserv_areaspec_";

/// Lifts spatial restrictor calls (`qserv_areaspec_box`,
/// `qserv_areaspec_circle`, `qserv_areaspec_poly`, `qserv_areaspec_ellipse`)
/// out of WHERE into the query context, stripping them from the emitted
/// SQL. The lifted restrictors drive chunk enumeration.
pub struct SpatialSpecPlugin;

impl SpatialSpecPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpatialSpecPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for SpatialSpecPlugin {
    fn name(&self) -> &'static str {
        "SpatialSpec"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        let Some(where_clause) = stmt.where_clause.take() else {
            return Ok(());
        };
        let mut rest = Vec::new();
        for term in where_clause.into_conjuncts() {
            match term {
                BoolTerm::Func(f) if f.name.starts_with(RESTRICTOR_PREFIX) => {
                    let params = f.args.iter().map(|a| a.to_string()).collect();
                    debug!(name = %f.name, "lifted spatial restrictor");
                    ctx.restrictors.push(SpatialRestrictor {
                        name: f.name,
                        params,
                    });
                }
                other => rest.push(other),
            }
        }
        stmt.where_clause = BoolTerm::from_conjuncts(rest);
        Ok(())
    }

    fn apply_physical(&mut self, _plan: &mut Plan, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sks_catalog::Catalog;
    use sks_query::parse_select;

    use super::*;

    fn run(sql: &str) -> (SelectStmt, QueryContext) {
        let mut stmt = parse_select(sql).unwrap();
        let mut ctx = QueryContext::new("LSST", Arc::new(Catalog::new()));
        let mut plugin = SpatialSpecPlugin::new();
        plugin.apply_logical(&mut stmt, &mut ctx).unwrap();
        (stmt, ctx)
    }

    #[test]
    fn lifts_box_restrictor_and_strips_where() {
        let (stmt, ctx) =
            run("SELECT ra, decl FROM Object WHERE qserv_areaspec_box(0, 0, 1, 1)");
        assert!(stmt.where_clause.is_none());
        assert_eq!(
            ctx.restrictors,
            vec![SpatialRestrictor {
                name: "qserv_areaspec_box".into(),
                params: vec!["0".into(), "0".into(), "1".into(), "1".into()],
            }]
        );
    }

    #[test]
    fn keeps_remaining_conjuncts() {
        let (stmt, ctx) = run(
            "SELECT ra FROM Object WHERE qserv_areaspec_circle(1, 1, 0.5) AND flux > 5",
        );
        assert_eq!(ctx.restrictors.len(), 1);
        assert_eq!(stmt.where_clause.as_ref().unwrap().to_string(), "flux > 5");
    }

    #[test]
    fn leaves_ordinary_functions_alone() {
        let (stmt, ctx) = run("SELECT ra FROM Object WHERE scisql_angSep(a, b, c, d) < 1");
        assert!(ctx.restrictors.is_empty());
        assert!(stmt.where_clause.is_some());
    }
}
