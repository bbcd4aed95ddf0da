//! Full-text tool index for mcpproxy
//!
//! An in-memory inverted index with BM25 ranking over the aggregated tool
//! corpus. The index is rebuilt from connected upstreams at startup, so
//! nothing here persists. Ranking is deterministic: equal scores tie-break
//! by `(server, tool)` ascending, and a given corpus + query always yields
//! the same ordered result.

pub mod index;
pub mod metadata;
pub mod tokenize;

pub use index::{IndexStats, SearchResult, ToolIndex};
pub use metadata::ToolMetadata;

use thiserror::Error;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Index errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The query was empty after tokenization
    #[error("Query cannot be empty")]
    EmptyQuery,

    /// No document with that identity
    #[error("Tool '{server}:{tool}' is not indexed")]
    NotFound { server: String, tool: String },
}

/// Default result count when the caller passes zero or a negative limit
pub const DEFAULT_SEARCH_LIMIT: usize = 15;

/// Upper bound on search results per query
pub const MAX_SEARCH_LIMIT: usize = 100;
