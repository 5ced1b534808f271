use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(db, table)` pair used as a catalog/alias lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DbTablePair {
    /// Database name; may be empty when unresolved.
    pub db: String,
    /// Table name.
    pub table: String,
}

impl DbTablePair {
    /// Build a pair from anything string-like.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for DbTablePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.db.is_empty() {
            write!(f, "{}", self.table)
        } else {
            write!(f, "{}.{}", self.db, self.table)
        }
    }
}

/// A column reference `db.table.column` where `db` and `table` may be empty,
/// meaning "resolve via query context".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Database qualifier; empty when unqualified.
    pub db: String,
    /// Table qualifier (or alias); empty when unqualified.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Build a reference from anything string-like.
    pub fn new(db: impl Into<String>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.db.is_empty() {
            write!(f, "{}.{}.{}", self.db, self.table, self.column)
        } else if !self.table.is_empty() {
            write!(f, "{}.{}", self.table, self.column)
        } else {
            write!(f, "{}", self.column)
        }
    }
}
