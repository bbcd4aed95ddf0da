//! RFC 9728 Protected Resource Metadata discovery
//!
//! A 401 from an upstream may carry `WWW-Authenticate: Bearer
//! resource_metadata="<url>"`. Fetching that URL yields the resource
//! identifier and authorization server list the OAuth flow must use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OAuthError, OAuthResult};

/// OAuth 2.0 Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The protected resource's resource identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Scope values used in authorization requests for this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,

    /// Issuer identifiers of authorization servers that can be used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
}

/// Fetch and parse the metadata document at `url`
pub async fn discover_protected_resource_metadata(
    url: &str,
    timeout: Duration,
) -> OAuthResult<ProtectedResourceMetadata> {
    let parsed = url::Url::parse(url).map_err(|e| OAuthError::DiscoveryFailed {
        url: url.to_string(),
        cause: format!("invalid metadata URL: {}", e),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(OAuthError::DiscoveryFailed {
                url: url.to_string(),
                cause: format!("unsupported scheme '{}'", scheme),
            });
        }
    }

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OAuthError::DiscoveryFailed {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

    let response = client
        .get(parsed)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| OAuthError::DiscoveryFailed {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(OAuthError::DiscoveryFailed {
            url: url.to_string(),
            cause: format!("HTTP status {}", response.status()),
        });
    }

    let metadata: ProtectedResourceMetadata =
        response.json().await.map_err(|e| OAuthError::DiscoveryFailed {
            url: url.to_string(),
            cause: format!("invalid metadata document: {}", e),
        })?;

    tracing::debug!(
        url = %url,
        resource = ?metadata.resource,
        "discovered protected resource metadata"
    );
    Ok(metadata)
}
