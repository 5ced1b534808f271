use serde::{Deserialize, Serialize};

use sks_query::{ColumnRef, DbTablePair};

/// Kind tag for a catalog table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Spatially partitioned base table whose rows define chunks.
    Director,
    /// Partitioned by foreign key into a director; same chunking.
    Child,
    /// N:M relation between two identically-partitioned directors.
    Match,
    /// Fully replicated to every worker.
    Replicated,
}

/// Metadata for a director table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTableInfo {
    /// Owning database.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Primary key column referenced by child/match foreign keys.
    pub pk: String,
    /// Longitude column used for spatial partitioning.
    pub lon: String,
    /// Latitude column used for spatial partitioning.
    pub lat: String,
    /// Partitioning id; two directors with equal ids have chunks and
    /// subchunks that line up exactly in superposition.
    pub partitioning_id: i32,
}

/// Metadata for a child table. The director is referenced by `(db, table)`
/// key into the catalog, never owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildTableInfo {
    /// Owning database.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Foreign key column referencing the director's primary key.
    pub fk: String,
    /// Lookup key of the director this table is partitioned by.
    pub director: DbTablePair,
}

/// Metadata for a match table. Directors are referenced by `(db, table)`
/// keys into the catalog, never owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTableInfo {
    /// Owning database.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Foreign key columns referencing the first and second director's
    /// primary keys.
    pub fk: (String, String),
    /// Lookup keys of the two directors related by this table.
    pub directors: (DbTablePair, DbTablePair),
}

/// Metadata for a replicated table. Uninteresting for query analysis beyond
/// its existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplTableInfo {
    /// Owning database.
    pub database: String,
    /// Table name.
    pub table: String,
}

/// Table metadata, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TableInfo {
    /// Director table metadata.
    Director(DirTableInfo),
    /// Child table metadata.
    Child(ChildTableInfo),
    /// Match table metadata.
    Match(MatchTableInfo),
    /// Replicated table metadata.
    Replicated(ReplTableInfo),
}

impl TableInfo {
    /// Kind tag of this table.
    pub fn kind(&self) -> TableKind {
        match self {
            TableInfo::Director(_) => TableKind::Director,
            TableInfo::Child(_) => TableKind::Child,
            TableInfo::Match(_) => TableKind::Match,
            TableInfo::Replicated(_) => TableKind::Replicated,
        }
    }

    /// Owning database.
    pub fn database(&self) -> &str {
        match self {
            TableInfo::Director(t) => &t.database,
            TableInfo::Child(t) => &t.database,
            TableInfo::Match(t) => &t.database,
            TableInfo::Replicated(t) => &t.database,
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        match self {
            TableInfo::Director(t) => &t.table,
            TableInfo::Child(t) => &t.table,
            TableInfo::Match(t) => &t.table,
            TableInfo::Replicated(t) => &t.table,
        }
    }

    /// Catalog lookup key for this table.
    pub fn key(&self) -> DbTablePair {
        DbTablePair::new(self.database(), self.table())
    }

    /// A table participates in chunked dispatch iff it is director, child,
    /// or match.
    pub fn is_chunked(&self) -> bool {
        !matches!(self, TableInfo::Replicated(_))
    }

    /// Only directors can be subdivided into subchunks on the fly.
    pub fn has_subchunks(&self) -> bool {
        matches!(self, TableInfo::Director(_))
    }

    /// Only directors materialize overlap rows.
    pub fn has_overlap(&self) -> bool {
        matches!(self, TableInfo::Director(_))
    }

    /// All column references from this table (under `alias` when non-empty)
    /// that may legally appear in an admissible equality join predicate.
    ///
    /// Directors contribute their primary key, children their foreign key,
    /// match tables both foreign keys. Replicated tables contribute nothing;
    /// joins against them are never restricted.
    pub fn join_columns(&self, alias: &str) -> Vec<ColumnRef> {
        let make = |column: &str| {
            if alias.is_empty() {
                ColumnRef::new("", self.table(), column)
            } else {
                ColumnRef::new("", alias, column)
            }
        };
        match self {
            TableInfo::Director(t) => vec![make(&t.pk)],
            TableInfo::Child(t) => vec![make(&t.fk)],
            TableInfo::Match(t) => vec![make(&t.fk.0), make(&t.fk.1)],
            TableInfo::Replicated(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn director() -> TableInfo {
        TableInfo::Director(DirTableInfo {
            database: "LSST".into(),
            table: "Object".into(),
            pk: "objectId".into(),
            lon: "ra".into(),
            lat: "decl".into(),
            partitioning_id: 1,
        })
    }

    #[test]
    fn join_columns_use_alias_when_present() {
        let d = director();
        let refs = d.join_columns("o1");
        assert_eq!(refs, vec![ColumnRef::new("", "o1", "objectId")]);
        let refs = d.join_columns("");
        assert_eq!(refs, vec![ColumnRef::new("", "Object", "objectId")]);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(director().kind(), TableKind::Director);
        assert!(director().is_chunked());
        assert!(director().has_subchunks());
    }
}
