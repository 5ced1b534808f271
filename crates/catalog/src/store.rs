use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

/// Metadata-store failure modes surfaced to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key does not exist: {0}")]
    KeyDoesNotExist(String),
    /// The store connection was lost or never established.
    #[error("connection failure: {0}")]
    ConnFailure(String),
    /// Authentication with the store failed.
    #[error("authentication failure: {0}")]
    AuthFailure(String),
    /// Any other store-side error; carries the store's own return code.
    #[error("internal store error (code {code}): {msg}")]
    Internal {
        /// Return code reported by the store client.
        code: i32,
        /// Description of the failure.
        msg: String,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Hierarchical key/value metadata store client boundary.
///
/// Keys are absolute slash-separated paths (`/DBS/LSST/TABLES/Object`). The
/// store is external (zookeeper-like); only this capability set is relied
/// upon. Every operation checks the client's return status by equality and
/// surfaces the real code on failure.
pub trait MetaStore: Send + Sync {
    /// Create `key` holding `value`. The parent node must already exist.
    fn create(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns whether `key` exists.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Fetch the value stored at `key`.
    fn get(&self, key: &str) -> StoreResult<String>;

    /// List the names (not paths) of the immediate children of `key`.
    fn get_children(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Delete `key`. Fails when the node still has children.
    fn delete_node(&self, key: &str) -> StoreResult<()>;
}

// Store return codes mirrored by the in-memory implementation.
const RC_NOT_EMPTY: i32 = -111;
const RC_NODE_EXISTS: i32 = -110;

/// In-memory [`MetaStore`] used by the catalog loader in tests and by
/// deployments without an external store.
#[derive(Debug, Default)]
pub struct MemStore {
    nodes: Mutex<BTreeMap<String, String>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn parent(key: &str) -> Option<&str> {
        let idx = key.rfind('/')?;
        if idx == 0 { Some("/") } else { Some(&key[..idx]) }
    }

    fn check_key(key: &str) -> StoreResult<()> {
        if !key.starts_with('/') || (key.len() > 1 && key.ends_with('/')) {
            return Err(StoreError::Internal {
                code: -1,
                msg: format!("malformed key '{key}'"),
            });
        }
        Ok(())
    }
}

impl MetaStore for MemStore {
    fn create(&self, key: &str, value: &str) -> StoreResult<()> {
        Self::check_key(key)?;
        let mut nodes = self.nodes.lock().expect("store lock");
        if nodes.contains_key(key) {
            return Err(StoreError::Internal {
                code: RC_NODE_EXISTS,
                msg: format!("node already exists: {key}"),
            });
        }
        if let Some(parent) = Self::parent(key) {
            if parent != "/" && !nodes.contains_key(parent) {
                return Err(StoreError::KeyDoesNotExist(parent.to_string()));
            }
        }
        nodes.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Self::check_key(key)?;
        Ok(self.nodes.lock().expect("store lock").contains_key(key))
    }

    fn get(&self, key: &str) -> StoreResult<String> {
        Self::check_key(key)?;
        let nodes = self.nodes.lock().expect("store lock");
        nodes
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyDoesNotExist(key.to_string()))
    }

    fn get_children(&self, key: &str) -> StoreResult<Vec<String>> {
        Self::check_key(key)?;
        let nodes = self.nodes.lock().expect("store lock");
        if key != "/" && !nodes.contains_key(key) {
            return Err(StoreError::KeyDoesNotExist(key.to_string()));
        }
        let prefix = if key == "/" {
            "/".to_string()
        } else {
            format!("{key}/")
        };
        let mut children = Vec::new();
        for k in nodes.keys() {
            if let Some(rest) = k.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.push(rest.to_string());
                }
            }
        }
        Ok(children)
    }

    fn delete_node(&self, key: &str) -> StoreResult<()> {
        Self::check_key(key)?;
        let mut nodes = self.nodes.lock().expect("store lock");
        if !nodes.contains_key(key) {
            return Err(StoreError::KeyDoesNotExist(key.to_string()));
        }
        let prefix = format!("{key}/");
        if nodes.keys().any(|k| k.starts_with(&prefix)) {
            return Err(StoreError::Internal {
                code: RC_NOT_EMPTY,
                msg: format!("node not empty: {key}"),
            });
        }
        nodes.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_parent() {
        let s = MemStore::new();
        assert_eq!(
            s.create("/a/b", "v"),
            Err(StoreError::KeyDoesNotExist("/a".to_string()))
        );
        s.create("/a", "").unwrap();
        s.create("/a/b", "v").unwrap();
        assert_eq!(s.get("/a/b").unwrap(), "v");
    }

    #[test]
    fn get_after_delete_fails_with_key_does_not_exist() {
        let s = MemStore::new();
        s.create("/a", "v").unwrap();
        s.delete_node("/a").unwrap();
        assert_eq!(
            s.get("/a"),
            Err(StoreError::KeyDoesNotExist("/a".to_string()))
        );
    }

    #[test]
    fn delete_refuses_non_empty_node() {
        let s = MemStore::new();
        s.create("/a", "").unwrap();
        s.create("/a/b", "").unwrap();
        match s.delete_node("/a") {
            Err(StoreError::Internal { code, .. }) => assert_eq!(code, RC_NOT_EMPTY),
            other => panic!("expected Internal, got {other:?}"),
        }
    }

    #[test]
    fn children_lists_immediate_names_only() {
        let s = MemStore::new();
        s.create("/a", "").unwrap();
        s.create("/a/b", "").unwrap();
        s.create("/a/c", "").unwrap();
        s.create("/a/b/d", "").unwrap();
        assert_eq!(s.get_children("/a").unwrap(), vec!["b", "c"]);
        assert_eq!(
            s.get_children("/missing"),
            Err(StoreError::KeyDoesNotExist("/missing".to_string()))
        );
    }
}
