use sks_common::Result;
use sks_query::SelectStmt;

use crate::aggregate_plugin::AggregatePlugin;
use crate::context::QueryContext;
use crate::mapping::QueryMapping;
use crate::spatial_plugin::SpatialSpecPlugin;
use crate::table_plugin::TablePlugin;

/// The statement set a user query decomposes into while the physical phase
/// runs.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The statement as analyzed, before chunk rewriting.
    pub stmt_original: SelectStmt,
    /// Per-shard statements; one entry unless overlap permutations were
    /// required.
    pub stmt_parallel: Vec<SelectStmt>,
    /// Master-side merge statement; `None` for pass-through concatenation.
    pub stmt_merge: Option<SelectStmt>,
    /// Whether the merge statement does real work.
    pub has_merge: bool,
    /// Union of the chunk substitution each plugin required.
    pub query_mapping: QueryMapping,
    /// Database whose partitioning drives dispatch.
    pub dominant_db: String,
}

impl Plan {
    /// Seed a plan from the logically-analyzed statement: one parallel
    /// statement, no merge.
    pub fn new(stmt: SelectStmt) -> Self {
        Self {
            stmt_parallel: vec![stmt.clone()],
            stmt_original: stmt,
            stmt_merge: None,
            has_merge: false,
            query_mapping: QueryMapping::default(),
            dominant_db: String::new(),
        }
    }
}

/// One transformation pass over the query.
///
/// Plugins run in a fixed order, each in two phases: `apply_logical`
/// operates on the single analyzed statement; `apply_physical` operates on
/// the decomposed [`Plan`].
pub trait QueryPlugin {
    /// Plugin name for registry listings and logs.
    fn name(&self) -> &'static str;

    /// Transform the logical statement in place.
    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()>;

    /// Transform the decomposed plan in place.
    fn apply_physical(&mut self, plan: &mut Plan, ctx: &mut QueryContext) -> Result<()>;
}

/// Ordered plugin list built at session construction. Registration is
/// explicit and deterministic; there is no process-wide plugin state.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn QueryPlugin>>,
}

impl PluginRegistry {
    /// The standard pipeline: `Table -> Aggregate -> SpatialSpec`.
    pub fn standard() -> Self {
        Self {
            plugins: vec![
                Box::new(TablePlugin::new()),
                Box::new(AggregatePlugin::new()),
                Box::new(SpatialSpecPlugin::new()),
            ],
        }
    }

    /// Registered plugin names, in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every plugin's logical phase, in order.
    pub fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        for p in &mut self.plugins {
            p.apply_logical(stmt, ctx)?;
        }
        Ok(())
    }

    /// Run every plugin's physical phase, in order.
    pub fn apply_physical(&mut self, plan: &mut Plan, ctx: &mut QueryContext) -> Result<()> {
        for p in &mut self.plugins {
            p.apply_physical(plan, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_order_is_fixed() {
        let reg = PluginRegistry::standard();
        assert_eq!(reg.names(), vec!["Table", "Aggregate", "SpatialSpec"]);
    }
}
