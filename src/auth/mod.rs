//! Caller identity for the social account API.
//!
//! Registration, login and token issuance live in an external identity
//! service. This module only turns an `Authorization: Bearer <token>`
//! header into a platform user id through an [`IdentityResolver`].

use axum::http::HeaderMap;
use std::collections::HashMap;


/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction and resolution errors
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("Authorization token not provided")]
    Missing,
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
    #[error("Authorization token is not recognized")]
    Unknown,
}

/// Maps a bearer token to the authenticated platform user id.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, bearer_token: &str) -> Option<String>;
}

/// Fixed token → user table, loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityResolver for StaticTokenResolver {
    fn resolve(&self, bearer_token: &str) -> Option<String> {
        self.tokens.get(bearer_token).cloned()
    }
}

/// Resolves the caller's user id from request headers.
pub fn authenticate(
    headers: &HeaderMap,
    resolver: &dyn IdentityResolver,
) -> Result<String, TokenError> {
    let token = extract_bearer_token(headers)?;
    resolver.resolve(&token).ok_or(TokenError::Unknown)
}
