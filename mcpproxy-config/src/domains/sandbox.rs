//! JavaScript sandbox limits

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Hard ceiling on a single execution's wall-clock budget
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Limits applied to `code_execution` runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Number of pooled runtimes; bounds cross-script parallelism
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Default wall-clock timeout per execution
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub default_timeout: Duration,

    /// Default upstream tool-call budget per execution; 0 means unlimited
    #[serde(default = "default_max_tool_calls")]
    pub default_max_tool_calls: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            default_timeout: default_timeout(),
            default_max_tool_calls: default_max_tool_calls(),
        }
    }
}

impl Validatable for SandboxConfig {
    fn validate(&self) -> ConfigResult<()> {
        crate::validation::validate_positive(
            self.pool_size as i64,
            "pool_size",
            self.domain_name(),
        )?;

        if self.default_timeout.is_zero() || self.default_timeout > MAX_TIMEOUT {
            return Err(self.validation_error(format!(
                "default_timeout must be within (0, {}s]",
                MAX_TIMEOUT.as_secs()
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "sandbox"
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_tool_calls() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut config = SandboxConfig::default();
        config.default_timeout = Duration::from_secs(601);
        assert!(config.validate().is_err());

        config.default_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
