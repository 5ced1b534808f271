use std::collections::HashMap;
use std::sync::Arc;

use sks_catalog::Catalog;
use sks_query::DbTablePair;

use crate::mapping::QueryMapping;

/// One lifted spatial restrictor (`qserv_areaspec_box` and friends), the
/// input to chunk enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialRestrictor {
    /// Restrictor function name as written.
    pub name: String,
    /// Rendered argument list.
    pub params: Vec<String>,
}

/// Bidirectional `(db, table) <-> alias` map for one user query.
///
/// `set` keeps both directions consistent: re-registering either side of an
/// existing association removes the stale entries first, so the map is a
/// bijection at all times.
#[derive(Debug, Default, Clone)]
pub struct TableAliases {
    forward: HashMap<String, DbTablePair>,
    reverse: HashMap<DbTablePair, String>,
}

impl TableAliases {
    /// Register `(db, table) <-> alias`. Idempotent; overwrites on conflict.
    pub fn set(&mut self, db: &str, table: &str, alias: &str) {
        let key = DbTablePair::new(db, table);
        if let Some(old_key) = self.forward.remove(alias) {
            self.reverse.remove(&old_key);
        }
        if let Some(old_alias) = self.reverse.remove(&key) {
            self.forward.remove(&old_alias);
        }
        self.forward.insert(alias.to_string(), key.clone());
        self.reverse.insert(key, alias.to_string());
    }

    /// Alias registered for `(db, table)`, if any.
    pub fn alias_for(&self, db: &str, table: &str) -> Option<&str> {
        self.reverse
            .get(&DbTablePair::new(db, table))
            .map(|s| s.as_str())
    }

    /// Table registered under `alias`, if any.
    pub fn table_for(&self, alias: &str) -> Option<&DbTablePair> {
        self.forward.get(alias)
    }

    /// Number of registered associations.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Per-user-query scratch state, created at analysis start and mutated only
/// by the plugin pipeline, in pipeline order.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Database assumed for unqualified table references.
    pub default_db: String,
    /// Database whose partitioning drives chunking and dispatch; set by the
    /// Table plugin from the first FROM entry.
    pub dominant_db: String,
    /// First table seen in FROM; the table an unqualified query "is about".
    pub anonymous_table: String,
    /// Flat `(db, table)` list from FROM, for name resolution.
    pub resolver_tables: Vec<DbTablePair>,
    /// Bijective alias map maintained by the Table plugin.
    pub aliases: TableAliases,
    /// Spatial restrictors lifted out of WHERE.
    pub restrictors: Vec<SpatialRestrictor>,
    /// Table metadata catalog.
    pub catalog: Arc<Catalog>,
    /// Chunk substitution summary, set once the physical phase ran.
    pub query_mapping: Option<QueryMapping>,
    /// Whether the merge statement does real work (aggregation) rather than
    /// pass-through concatenation.
    pub needs_merge: bool,
    /// Number of chunks added for dispatch.
    pub chunk_count: u32,
}

impl QueryContext {
    /// Create a fresh context for one user query.
    pub fn new(default_db: impl Into<String>, catalog: Arc<Catalog>) -> Self {
        Self {
            default_db: default_db.into(),
            dominant_db: String::new(),
            anonymous_table: String::new(),
            resolver_tables: Vec::new(),
            aliases: TableAliases::default(),
            restrictors: Vec::new(),
            catalog,
            query_mapping: None,
            needs_merge: false,
            chunk_count: 0,
        }
    }

    /// Whether the analyzed query requires chunked dispatch.
    pub fn has_chunks(&self) -> bool {
        self.query_mapping
            .as_ref()
            .map(|m| m.has_chunks)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_map_is_a_bijection() {
        let mut a = TableAliases::default();
        a.set("LSST", "Object", "o1");
        assert_eq!(a.alias_for("LSST", "Object"), Some("o1"));
        assert_eq!(a.table_for("o1"), Some(&DbTablePair::new("LSST", "Object")));

        // Re-aliasing the same table drops the old alias.
        a.set("LSST", "Object", "o2");
        assert_eq!(a.alias_for("LSST", "Object"), Some("o2"));
        assert_eq!(a.table_for("o1"), None);
        assert_eq!(a.len(), 1);

        // Reusing an alias for another table drops the old association.
        a.set("LSST", "Source", "o2");
        assert_eq!(a.alias_for("LSST", "Object"), None);
        assert_eq!(a.table_for("o2"), Some(&DbTablePair::new("LSST", "Source")));
        assert_eq!(a.len(), 1);
    }
}
