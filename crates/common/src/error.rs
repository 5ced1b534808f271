use thiserror::Error;

/// Canonical SkyShard error taxonomy used across crates.
///
/// Classification guidance:
/// - [`SksError::Parse`]: SQL text the parser rejected, before any analysis
/// - [`SksError::Analysis`]: query shape/name/metadata issues discovered while rewriting
/// - [`SksError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
/// - [`SksError::Payload`]: job payload failed structural verification before dispatch
/// - [`SksError::Transport`]: network/session failures that are candidates for retry
/// - [`SksError::Protocol`]: peer violated the wire contract; terminal for that request
/// - [`SksError::Merge`]: the result merger refused streamed data; terminal for the query
/// - [`SksError::Store`]: metadata-store access failures with the store's own code
/// - [`SksError::Bug`]: broken internal invariants (programming errors)
#[derive(Debug, Error)]
pub enum SksError {
    /// SQL parse failure. The message carries the offending token and position
    /// as reported by the parser boundary.
    #[error("parse error: {0}")]
    Parse(String),

    /// Query analysis/rewrite failures.
    ///
    /// Examples:
    /// - no table references in FROM
    /// - a match table whose directors use different partitioning
    /// - chunk rewriting requested for a query without chunked tables
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Valid request for a feature/shape not implemented in this version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Job payload failed verification before it could be dispatched.
    #[error("payload error: {0}")]
    Payload(String),

    /// Transient network/session failure. Callers may retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end violated the wire protocol. Terminal for the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The result merger refused streamed data. Terminal for the user query.
    #[error("merge error: {0}")]
    Merge(String),

    /// Metadata-store failure, carrying the store's error kind and code.
    #[error("metadata store error: {0}")]
    Store(String),

    /// Broken internal invariant. Raising this indicates a programming error,
    /// not a condition callers are expected to handle.
    #[error("internal bug: {0}")]
    Bug(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard SkyShard result alias.
pub type Result<T> = std::result::Result<T, SksError>;
