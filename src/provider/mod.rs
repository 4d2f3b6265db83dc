//! Provider adapter contract.
//!
//! Every social platform speaks OAuth 2.0 with its own endpoints, scopes and
//! payload shapes. Adapters hide those differences behind [`ProviderAdapter`]
//! so the authorization flow and the freshness guard never branch on the
//! provider.
//!
//! # Lifecycle
//! 1. The registry is built once at startup from configuration
//! 2. `build_authorization_url(state)` produces the consent redirect
//! 3. `exchange_code(code)` redeems the callback code for tokens and the
//!    provider-side identity
//! 4. `refresh(refresh_token)` is called by the freshness guard when a
//!    credential is about to expire

use crate::credentials::{Provider, TokenSet};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How a provider call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider refused the code or token. Re-authorization is needed.
    Rejected,
    /// Timeout, connection failure or 5xx. Safe to retry later.
    Transient,
    /// 2xx response whose payload could not be used.
    Malformed,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Rejected => f.write_str("rejected"),
            ProviderErrorKind::Transient => f.write_str("transient"),
            ProviderErrorKind::Malformed => f.write_str("malformed"),
        }
    }
}

/// Failure of a code exchange or refresh against a provider.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{provider} {kind} error: {message}")]
pub struct ProviderAuthError {
    pub provider: Provider,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderAuthError {
    pub fn rejected(provider: Provider, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind: ProviderErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn transient(provider: Provider, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn malformed(provider: Provider, message: impl Into<String>) -> Self {
        Self {
            provider,
            kind: ProviderErrorKind::Malformed,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ProviderErrorKind::Rejected
    }
}

/// Result of redeeming an authorization code.
#[derive(Clone)]
pub struct ExchangeResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
    pub provider_account_id: String,
    pub display_name: String,
}

/// Result of a refresh grant.
#[derive(Clone)]
pub struct RefreshResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
}

impl fmt::Debug for ExchangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeResult")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("provider_account_id", &self.provider_account_id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl fmt::Debug for RefreshResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshResult")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

impl ExchangeResult {
    /// Tokens to persist. Fails with a `Malformed` error when `expires_in`
    /// is negative or too large to be a timestamp.
    pub fn token_set(&self, provider: Provider) -> Result<TokenSet, ProviderAuthError> {
        Ok(TokenSet {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: expires_at(provider, self.expires_in_seconds, Utc::now())?,
        })
    }
}

impl RefreshResult {
    /// Tokens to persist. Providers that do not rotate refresh tokens omit
    /// one from the response; the previous refresh token is kept then.
    pub fn token_set(
        &self,
        provider: Provider,
        previous_refresh_token: Option<&str>,
    ) -> Result<TokenSet, ProviderAuthError> {
        Ok(TokenSet {
            access_token: self.access_token.clone(),
            refresh_token: self
                .refresh_token
                .clone()
                .or_else(|| previous_refresh_token.map(str::to_string)),
            expires_at: expires_at(provider, self.expires_in_seconds, Utc::now())?,
        })
    }
}

fn expires_at(
    provider: Provider,
    expires_in_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ProviderAuthError> {
    let Some(seconds) = expires_in_seconds else {
        return Ok(None);
    };
    if seconds < 0 {
        return Err(ProviderAuthError::malformed(
            provider,
            format!("negative expires_in: {}", seconds),
        ));
    }
    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(Some)
        .ok_or_else(|| {
            ProviderAuthError::malformed(provider, format!("expires_in out of range: {}", seconds))
        })
}

/// OAuth capability every provider implementation must satisfy.
///
/// Adapters are built from explicit configuration and must fail at
/// construction when required values are missing, never on first use.
///
/// # Example
/// ```no_run
/// use social_accounts::credentials::Provider;
/// use social_accounts::provider::{ExchangeResult, ProviderAdapter, ProviderAuthError, RefreshResult};
/// use async_trait::async_trait;
///
/// struct ExampleAdapter;
///
/// #[async_trait]
/// impl ProviderAdapter for ExampleAdapter {
///     fn identifier(&self) -> Provider {
///         Provider::Facebook
///     }
///
///     fn build_authorization_url(&self, state: &str) -> String {
///         format!("https://example.com/oauth?response_type=code&state={}", state)
///     }
///
///     async fn exchange_code(&self, _code: &str) -> Result<ExchangeResult, ProviderAuthError> {
///         Err(ProviderAuthError::rejected(Provider::Facebook, "not implemented"))
///     }
///
///     async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
///         Err(ProviderAuthError::rejected(Provider::Facebook, "no refresh tokens"))
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter serves.
    fn identifier(&self) -> Provider;

    /// Consent URL embedding client id, redirect URI, scopes,
    /// `response_type=code` and the opaque `state`. No I/O.
    fn build_authorization_url(&self, state: &str) -> String;

    /// Redeems an authorization code for tokens and the provider-side identity.
    async fn exchange_code(&self, code: &str) -> Result<ExchangeResult, ProviderAuthError>;

    /// Obtains a new access token. A `Rejected` error means the refresh
    /// token is dead and the user has to re-authorize.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResult, ProviderAuthError>;
}

/// Provider → adapter map, resolved once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own identifier, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.identifier(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Registered providers in a stable order.
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
