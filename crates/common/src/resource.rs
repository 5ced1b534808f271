use std::fmt;

use crate::error::{Result, SksError};
use crate::ids::ChunkId;

/// Worker resource selector for one chunk of one database.
///
/// The canonical path form is `/chk/<db>/<chunkId>`; the session service
/// routes a job to whichever worker currently serves that resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUnit {
    /// Database whose partitioning owns the chunk.
    pub db: String,
    /// Chunk number.
    pub chunk: ChunkId,
}

impl ResourceUnit {
    /// Build the resource for a (db, chunk) pair.
    pub fn db_chunk(db: impl Into<String>, chunk: ChunkId) -> Self {
        Self {
            db: db.into(),
            chunk,
        }
    }

    /// Render the canonical resource path.
    pub fn path(&self) -> String {
        format!("/chk/{}/{}", self.db, self.chunk)
    }

    /// Parse a canonical resource path back into its parts.
    pub fn parse(path: &str) -> Result<Self> {
        let mut parts = path.split('/');
        match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(""), Some("chk"), Some(db), Some(chunk), None) if !db.is_empty() => {
                let chunk = chunk
                    .parse::<ChunkId>()
                    .map_err(|e| SksError::Config(format!("bad chunk in resource '{path}': {e}")))?;
                Ok(Self::db_chunk(db, chunk))
            }
            _ => Err(SksError::Config(format!("bad resource path '{path}'"))),
        }
    }
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trip() {
        let ru = ResourceUnit::db_chunk("LSST", 1234);
        assert_eq!(ru.path(), "/chk/LSST/1234");
        assert_eq!(ResourceUnit::parse("/chk/LSST/1234").unwrap(), ru);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(ResourceUnit::parse("/chk/LSST").is_err());
        assert!(ResourceUnit::parse("/chk//12").is_err());
        assert!(ResourceUnit::parse("/other/LSST/12").is_err());
        assert!(ResourceUnit::parse("/chk/LSST/notanum").is_err());
    }
}
