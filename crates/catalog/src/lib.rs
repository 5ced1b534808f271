//! Table metadata catalog and metadata-store boundary for SkyShard.
//!
//! There are four kinds of tables in the system. *Replicated* tables are
//! available in their entirety on every worker and never constrain query
//! rewriting. *Director* tables are spatially partitioned into chunks (by
//! longitude/latitude) which can be subdivided into subchunks; rows close to
//! a subchunk boundary are additionally materialized in an overlap table so
//! near-neighbor joins never cross workers. *Child* tables are partitioned
//! by a foreign key into a director and share its chunking. *Match* tables
//! relate two identically-partitioned directors N-to-M, with each match row
//! stored in the chunks of both sides.
//!
//! Key modules:
//! - [`table_info`]: per-kind table metadata
//! - [`catalog`]: the read-only lookup structure used by query analysis
//! - [`store`]: the hierarchical key/value metadata-store client boundary
//! - [`loader`]: catalog construction from a metadata store

pub mod catalog;
pub mod loader;
pub mod store;
pub mod table_info;

pub use catalog::Catalog;
pub use loader::load_catalog;
pub use store::{MemStore, MetaStore, StoreError, StoreResult};
pub use table_info::{
    ChildTableInfo, DirTableInfo, MatchTableInfo, ReplTableInfo, TableInfo, TableKind,
};
