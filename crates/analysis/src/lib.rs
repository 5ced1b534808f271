//! Query analysis, rewrite pipeline, and chunk mapping for SkyShard.
//!
//! Architecture role:
//! - annotates a parsed SELECT with table metadata and aliases
//! - decomposes it into parallel (per-shard) statements and a master-side
//!   merge statement through an ordered plugin pipeline
//! - plans chunk/subchunk iteration, including the overlap permutations
//!   required by near-neighbor joins
//! - renders per-chunk SQL and job payloads
//!
//! Key modules:
//! - [`context`]: per-user-query scratch state
//! - [`plugin`]: the transformation-pass contract and registry
//! - [`table_plugin`], [`aggregate_plugin`], [`spatial_plugin`]: the fixed
//!   `Table -> Aggregate -> SpatialSpec` pipeline
//! - [`mapping`]: chunk specs and the template/chunk substitution mapping
//! - [`session`]: the facade driving parse, analysis, and chunk-query
//!   generation
//! - [`task_msg`]: serialized job payloads sent to workers

pub mod aggregate_plugin;
pub mod context;
pub mod mapping;
pub mod plugin;
pub mod session;
pub mod spatial_plugin;
pub mod table_plugin;
pub mod task_msg;

pub use context::{QueryContext, SpatialRestrictor, TableAliases};
pub use mapping::{
    ChunkQuerySpec, ChunkSpec, QueryMapping, fragment_chunk_spec, normalize_chunk_specs,
};
pub use plugin::{Plan, PluginRegistry, QueryPlugin};
pub use session::{DUMMY_CHUNK_ID, QuerySession};
pub use task_msg::{TaskFragment, TaskMsg};
