//! OAuth error types

use thiserror::Error;

/// Result type for OAuth operations
pub type OAuthResult<T> = Result<T, OAuthError>;

/// OAuth errors
#[derive(Error, Debug, Clone)]
pub enum OAuthError {
    /// Another flow for the same server is already running
    #[error("An OAuth flow for '{server}' is already in progress")]
    FlowInProgress { server: String },

    /// Waiting for a flow hit the deadline
    #[error("Timed out waiting for the OAuth flow for '{server}'")]
    Timeout { server: String },

    /// RFC 9728 metadata could not be fetched or parsed
    #[error("Protected resource metadata discovery failed for {url}: {cause}")]
    DiscoveryFailed { url: String, cause: String },

    /// The token endpoint rejected the exchange
    #[error("Token exchange failed: {message}")]
    TokenExchange { message: String },

    /// A URL could not be parsed or rewritten
    #[error("Invalid URL: {message}")]
    InvalidUrl { message: String },

    /// The upstream has no usable OAuth configuration
    #[error("OAuth is not configured for '{server}'")]
    NotConfigured { server: String },
}
