//! Response truncation and cache settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Truncator and response-cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    /// Serialized responses above this many bytes are truncated and cached
    #[serde(default = "default_limit_bytes")]
    pub limit_bytes: usize,

    /// Records included in the truncated preview
    #[serde(default = "default_preview_records")]
    pub preview_records: usize,

    /// Maximum cached responses held at once
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// How long a cached response stays readable
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            limit_bytes: default_limit_bytes(),
            preview_records: default_preview_records(),
            cache_capacity: default_cache_capacity(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

impl Validatable for TruncationConfig {
    fn validate(&self) -> ConfigResult<()> {
        crate::validation::validate_positive(
            self.limit_bytes as i64,
            "limit_bytes",
            self.domain_name(),
        )?;
        crate::validation::validate_positive(
            self.cache_capacity as i64,
            "cache_capacity",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "truncation"
    }
}

fn default_limit_bytes() -> usize {
    20_000
}

fn default_preview_records() -> usize {
    10
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(600)
}
