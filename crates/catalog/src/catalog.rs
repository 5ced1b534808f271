use std::collections::HashMap;

use sks_common::{Result, SksError};
use sks_query::DbTablePair;
use tracing::debug;

use crate::table_info::{DirTableInfo, TableInfo};

/// Read-only table metadata catalog.
///
/// Built once (from a metadata store or by hand in tests), validated, then
/// only consulted. `lookup` returns a borrowed [`TableInfo`]; an unknown
/// table yields `None`, which query analysis treats as replicated.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    tables: HashMap<DbTablePair, TableInfo>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one table. Replaces any previous entry under the same key.
    pub fn insert(&mut self, info: TableInfo) {
        self.tables.insert(info.key(), info);
    }

    /// Resolve `(db, table)` to its metadata, or `None` when unknown.
    pub fn lookup(&self, db: &str, table: &str) -> Option<&TableInfo> {
        self.tables.get(&DbTablePair::new(db, table))
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true when the catalog has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Resolve the director metadata a child or match entry points at.
    pub fn director(&self, key: &DbTablePair) -> Option<&DirTableInfo> {
        match self.tables.get(key) {
            Some(TableInfo::Director(d)) => Some(d),
            _ => None,
        }
    }

    /// Check referential integrity of the whole catalog:
    /// - every child's director exists and is a director;
    /// - every match's directors exist, are directors, and share one
    ///   partitioning id.
    pub fn validate(&self) -> Result<()> {
        for (key, info) in &self.tables {
            match info {
                TableInfo::Child(c) => {
                    if self.director(&c.director).is_none() {
                        return Err(SksError::Analysis(format!(
                            "child table {key} references missing director {}",
                            c.director
                        )));
                    }
                }
                TableInfo::Match(m) => {
                    let first = self.director(&m.directors.0).ok_or_else(|| {
                        SksError::Analysis(format!(
                            "match table {key} references missing director {}",
                            m.directors.0
                        ))
                    })?;
                    let second = self.director(&m.directors.1).ok_or_else(|| {
                        SksError::Analysis(format!(
                            "match table {key} references missing director {}",
                            m.directors.1
                        ))
                    })?;
                    if first.partitioning_id != second.partitioning_id {
                        return Err(SksError::Analysis(format!(
                            "match table {key} relates directors with different \
                             partitioning ids ({} vs {})",
                            first.partitioning_id, second.partitioning_id
                        )));
                    }
                }
                TableInfo::Director(_) | TableInfo::Replicated(_) => {}
            }
        }
        debug!(tables = self.tables.len(), "catalog validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_info::{ChildTableInfo, MatchTableInfo};

    fn director(db: &str, table: &str, pid: i32) -> TableInfo {
        TableInfo::Director(DirTableInfo {
            database: db.into(),
            table: table.into(),
            pk: "id".into(),
            lon: "ra".into(),
            lat: "decl".into(),
            partitioning_id: pid,
        })
    }

    #[test]
    fn lookup_unknown_is_none() {
        let cat = Catalog::new();
        assert!(cat.lookup("LSST", "Nope").is_none());
    }

    #[test]
    fn validate_rejects_dangling_child() {
        let mut cat = Catalog::new();
        cat.insert(TableInfo::Child(ChildTableInfo {
            database: "LSST".into(),
            table: "Source".into(),
            fk: "objectId".into(),
            director: DbTablePair::new("LSST", "Object"),
        }));
        assert!(cat.validate().is_err());
        cat.insert(director("LSST", "Object", 1));
        assert!(cat.validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_match_partitioning() {
        let mut cat = Catalog::new();
        cat.insert(director("LSST", "Object", 1));
        cat.insert(director("LSST", "Galaxy", 2));
        cat.insert(TableInfo::Match(MatchTableInfo {
            database: "LSST".into(),
            table: "ObjGal".into(),
            fk: ("objId".into(), "galId".into()),
            directors: (
                DbTablePair::new("LSST", "Object"),
                DbTablePair::new("LSST", "Galaxy"),
            ),
        }));
        assert!(cat.validate().is_err());
    }
}
