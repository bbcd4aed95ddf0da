//! Extra-parameter plumbing and the authorization-code grant
//!
//! Certain providers reject token requests that omit the `resource`
//! parameter advertised via RFC 9728. Every URL and body builder here
//! therefore takes the merged extras, so discovered values cannot be lost
//! between the authorize redirect and the token exchange.

use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{OAuthError, OAuthResult};

/// Merge extra OAuth parameters.
///
/// Auto-detected values seed the map; explicitly configured values win.
/// `resource` comes from RFC 9728 discovery, falling back to the server URL.
pub fn merge_extra_params(
    configured: &BTreeMap<String, String>,
    discovered_resource: Option<&str>,
    fallback_resource: &str,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();

    let resource = discovered_resource.unwrap_or(fallback_resource);
    if !resource.is_empty() {
        merged.insert("resource".to_string(), resource.to_string());
    }

    for (key, value) in configured {
        merged.insert(key.clone(), value.clone());
    }

    merged
}

/// Merge `extras` into the query string of `base`, overwriting existing
/// keys. Re-injection of the same extras is a no-op.
pub fn inject_extra_params_into_url(
    base: &str,
    extras: &BTreeMap<String, String>,
) -> OAuthResult<String> {
    let mut url = url::Url::parse(base).map_err(|e| OAuthError::InvalidUrl {
        message: format!("{}: {}", base, e),
    })?;

    if extras.is_empty() {
        return Ok(url.to_string());
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !extras.contains_key(key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    for (key, value) in extras {
        pairs.push((key.clone(), value.clone()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(url.to_string())
}

/// PKCE verifier/challenge pair (S256)
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh 64-character verifier and its S256 challenge
    pub fn generate() -> Self {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
        let mut rng = rand::thread_rng();
        let verifier: String = (0..64)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();

        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);

        Self { verifier, challenge }
    }
}

/// Build the authorization URL, extras included
#[allow(clippy::too_many_arguments)]
pub fn build_authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: &PkcePair,
    extras: &BTreeMap<String, String>,
) -> OAuthResult<String> {
    let mut url = url::Url::parse(authorization_endpoint).map_err(|e| OAuthError::InvalidUrl {
        message: format!("{}: {}", authorization_endpoint, e),
    })?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256");

    if !scopes.is_empty() {
        url.query_pairs_mut().append_pair("scope", &scopes.join(" "));
    }

    inject_extra_params_into_url(url.as_str(), extras)
}

/// One token-endpoint request (authorization-code exchange or refresh)
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub extras: BTreeMap<String, String>,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Form body for the authorization-code exchange, extras included
    pub fn exchange_form(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Vec<(String, String)> {
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("code_verifier".to_string(), verifier.to_string()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }
        for (key, value) in &self.extras {
            form.push((key.clone(), value.clone()));
        }
        form
    }

    /// Form body for a refresh request, extras included
    pub fn refresh_form(&self, refresh_token: &str) -> Vec<(String, String)> {
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }
        for (key, value) in &self.extras {
            form.push((key.clone(), value.clone()));
        }
        form
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> OAuthResult<TokenResponse> {
        self.post_form(self.exchange_form(code, redirect_uri, verifier))
            .await
    }

    /// Refresh an access token
    pub async fn refresh(&self, refresh_token: &str) -> OAuthResult<TokenResponse> {
        self.post_form(self.refresh_form(refresh_token)).await
    }

    async fn post_form(&self, form: Vec<(String, String)>) -> OAuthResult<TokenResponse> {
        let client = reqwest::Client::new();
        let response = client
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchange {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::TokenExchange {
                message: format!(
                    "token endpoint returned {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            });
        }

        response.json().await.map_err(|e| OAuthError::TokenExchange {
            message: format!("invalid token response: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extras_with_resource(resource: &str) -> BTreeMap<String, String> {
        let mut extras = BTreeMap::new();
        extras.insert("resource".to_string(), resource.to_string());
        extras
    }

    #[test]
    fn test_merge_prefers_configured_over_discovered() {
        let mut configured = BTreeMap::new();
        configured.insert("resource".to_string(), "https://override".to_string());
        configured.insert("audience".to_string(), "mcp".to_string());

        let merged = merge_extra_params(
            &configured,
            Some("https://discovered"),
            "https://fallback",
        );
        assert_eq!(merged["resource"], "https://override");
        assert_eq!(merged["audience"], "mcp");
    }

    #[test]
    fn test_merge_uses_discovered_then_fallback() {
        let empty = BTreeMap::new();
        let merged = merge_extra_params(&empty, Some("https://discovered"), "https://fallback");
        assert_eq!(merged["resource"], "https://discovered");

        let merged = merge_extra_params(&empty, None, "https://fallback");
        assert_eq!(merged["resource"], "https://fallback");
    }

    #[test]
    fn test_inject_adds_and_overwrites() {
        let extras = extras_with_resource("https://api/mcp");
        let injected =
            inject_extra_params_into_url("https://auth.example.com/authorize?state=abc", &extras)
                .unwrap();
        assert!(injected.contains("state=abc"));
        assert!(injected.contains("resource=https%3A%2F%2Fapi%2Fmcp"));

        // Existing key is overwritten, not duplicated
        let overwritten = inject_extra_params_into_url(
            "https://auth.example.com/authorize?resource=stale",
            &extras,
        )
        .unwrap();
        assert_eq!(overwritten.matches("resource=").count(), 1);
        assert!(overwritten.contains("resource=https%3A%2F%2Fapi%2Fmcp"));
    }

    #[test]
    fn test_inject_is_idempotent() {
        let extras = extras_with_resource("https://api/mcp");
        let once =
            inject_extra_params_into_url("https://auth.example.com/authorize", &extras).unwrap();
        let twice = inject_extra_params_into_url(&once, &extras).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_authorization_url_carries_resource_and_pkce() {
        let pkce = PkcePair::generate();
        let url = build_authorization_url(
            "https://auth.example.com/authorize",
            "client-1",
            "http://127.0.0.1:8090/callback",
            &["mcp.read".to_string()],
            "state-1",
            &pkce,
            &extras_with_resource("https://api/mcp"),
        )
        .unwrap();

        assert!(url.contains("response_type=code"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("resource=https%3A%2F%2Fapi%2Fmcp"));
        assert!(url.contains("scope=mcp.read"));
    }

    #[test]
    fn test_token_bodies_carry_extras() {
        let request = TokenRequest {
            token_endpoint: "https://auth.example.com/token".to_string(),
            client_id: "client-1".to_string(),
            client_secret: None,
            extras: extras_with_resource("https://api/mcp"),
        };

        let exchange = request.exchange_form("code-1", "http://cb", "verifier");
        assert!(exchange
            .iter()
            .any(|(k, v)| k == "resource" && v == "https://api/mcp"));

        let refresh = request.refresh_form("refresh-1");
        assert!(refresh
            .iter()
            .any(|(k, v)| k == "resource" && v == "https://api/mcp"));
    }

    #[test]
    fn test_pkce_challenge_is_s256_of_verifier() {
        let pkce = PkcePair::generate();
        assert_eq!(pkce.verifier.len(), 64);

        let digest = Sha256::digest(pkce.verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert_eq!(pkce.challenge, expected);
    }
}
