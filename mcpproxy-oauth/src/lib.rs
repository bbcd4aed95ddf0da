//! OAuth support for upstream MCP servers
//!
//! Three concerns live here: the single-flight flow coordinator, RFC 9728
//! protected-resource metadata discovery, and the extra-parameter plumbing
//! that guarantees discovered values (notably `resource`) reach both the
//! authorization URL and every token request body.

pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod params;

pub use coordinator::{FlowContext, FlowCoordinator, FlowState};
pub use discovery::{discover_protected_resource_metadata, ProtectedResourceMetadata};
pub use error::{OAuthError, OAuthResult};
pub use params::{
    build_authorization_url, inject_extra_params_into_url, merge_extra_params, PkcePair,
    TokenRequest, TokenResponse,
};
