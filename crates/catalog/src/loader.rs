use sks_common::{Result, SksError};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::store::{MetaStore, StoreError};
use crate::table_info::TableInfo;

// Store layout roots.
const DBS_ROOT: &str = "/DBS";

fn table_key(db: &str, table: &str) -> String {
    format!("{DBS_ROOT}/{db}/TABLES/{table}")
}

fn tables_root(db: &str) -> String {
    format!("{DBS_ROOT}/{db}/TABLES")
}

/// Build a validated [`Catalog`] from the metadata store.
///
/// Layout: `/DBS/<db>/TABLES/<table>` holds one JSON document describing the
/// table (kind tag plus per-kind fields, the serde form of [`TableInfo`]).
/// A database without a `TABLES` node contributes no tables and is skipped
/// with a warning; any other store failure aborts the load.
pub fn load_catalog(store: &dyn MetaStore) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    let dbs = match store.get_children(DBS_ROOT) {
        Ok(dbs) => dbs,
        Err(StoreError::KeyDoesNotExist(_)) => Vec::new(),
        Err(e) => return Err(SksError::Store(e.to_string())),
    };
    for db in dbs {
        let tables = match store.get_children(&tables_root(&db)) {
            Ok(tables) => tables,
            Err(StoreError::KeyDoesNotExist(key)) => {
                warn!(db = %db, key = %key, "database has no TABLES node, skipping");
                continue;
            }
            Err(e) => return Err(SksError::Store(e.to_string())),
        };
        for table in tables {
            let raw = store
                .get(&table_key(&db, &table))
                .map_err(|e| SksError::Store(e.to_string()))?;
            let info: TableInfo = serde_json::from_str(&raw).map_err(|e| {
                SksError::Store(format!("bad table document for {db}.{table}: {e}"))
            })?;
            if info.database() != db || info.table() != table {
                return Err(SksError::Store(format!(
                    "table document for {db}.{table} names {}.{}",
                    info.database(),
                    info.table()
                )));
            }
            catalog.insert(info);
        }
    }
    catalog.validate()?;
    debug!(tables = catalog.len(), "catalog loaded");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::table_info::TableKind;

    fn seed(store: &MemStore) {
        store.create(DBS_ROOT, "").unwrap();
        store.create("/DBS/LSST", "").unwrap();
        store.create("/DBS/LSST/TABLES", "").unwrap();
        store
            .create(
                "/DBS/LSST/TABLES/Object",
                r#"{"kind":"director","database":"LSST","table":"Object",
                    "pk":"objectId","lon":"ra","lat":"decl","partitioning_id":1}"#,
            )
            .unwrap();
        store
            .create(
                "/DBS/LSST/TABLES/Source",
                r#"{"kind":"child","database":"LSST","table":"Source",
                    "fk":"objectId","director":{"db":"LSST","table":"Object"}}"#,
            )
            .unwrap();
        store
            .create(
                "/DBS/LSST/TABLES/Filter",
                r#"{"kind":"replicated","database":"LSST","table":"Filter"}"#,
            )
            .unwrap();
    }

    #[test]
    fn loads_and_validates() {
        let store = MemStore::new();
        seed(&store);
        let catalog = load_catalog(&store).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.lookup("LSST", "Object").unwrap().kind(),
            TableKind::Director
        );
        assert_eq!(
            catalog.lookup("LSST", "Source").unwrap().kind(),
            TableKind::Child
        );
    }

    #[test]
    fn empty_store_yields_empty_catalog() {
        let store = MemStore::new();
        let catalog = load_catalog(&store).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn dangling_child_fails_validation() {
        let store = MemStore::new();
        store.create(DBS_ROOT, "").unwrap();
        store.create("/DBS/LSST", "").unwrap();
        store.create("/DBS/LSST/TABLES", "").unwrap();
        store
            .create(
                "/DBS/LSST/TABLES/Source",
                r#"{"kind":"child","database":"LSST","table":"Source",
                    "fk":"objectId","director":{"db":"LSST","table":"Object"}}"#,
            )
            .unwrap();
        assert!(load_catalog(&store).is_err());
    }
}
