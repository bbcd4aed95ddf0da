//! Oversized-response handling for mcpproxy
//!
//! Large tool results are cut down to a preview and parked in a
//! content-addressed cache; `read_cache` pages through the full body later.

pub mod cache;
pub mod truncate;

pub use cache::{CachedResponse, Page, ResponseCache};
pub use truncate::{TruncateResult, Truncator};

use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// No entry under that key (never stored, expired, or evicted)
    #[error("No cached response for key '{key}'")]
    Miss { key: String },

    /// Offset or limit outside the allowed bounds
    #[error("Invalid range: {message}")]
    InvalidRange { message: String },

    /// Offset points past the end of the cached records
    #[error("Offset {offset} is out of bounds (total records: {total})")]
    RangeOutOfBounds { offset: usize, total: usize },
}

/// Inclusive bounds for the per-read record limit
pub const MIN_READ_LIMIT: i64 = 1;
pub const MAX_READ_LIMIT: i64 = 1000;
