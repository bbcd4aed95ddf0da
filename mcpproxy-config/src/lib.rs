//! Domain-driven configuration for mcpproxy
//!
//! Configuration is split by functional domain, each with validation,
//! serde defaults, and environment variable overrides.

pub mod diff;
pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    listen::ListenConfig, logging::LoggingConfig, sandbox::SandboxConfig,
    security::SecurityConfig, truncation::TruncationConfig, upstream::OAuthClientConfig,
    upstream::Protocol, upstream::UpstreamConfig, ProxyConfig,
};

pub use diff::diff_configs;
pub use validation::Validatable;
