use crate::credentials::{Provider, StoreError};
use crate::provider::ProviderAuthError;

/// Errors surfaced by the account linking core.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Invalid or incomplete adapter/service configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// OAuth `state` was forged, expired, replayed or belongs to someone else.
    #[error("invalid OAuth state: {0}")]
    CsrfValidation(String),

    #[error(transparent)]
    ProviderAuth(#[from] ProviderAuthError),

    /// No usable or refreshable token exists; the user must re-authorize.
    #[error("{provider} account requires re-authorization: {reason}")]
    CredentialUnusable { provider: Provider, reason: String },

    /// Missing account, or an account owned by someone else.
    #[error("social account not found")]
    NotFound,

    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(Provider),

    #[error("this {0} account is already linked to another user")]
    AccountLinkedElsewhere(Provider),

    #[error("a different {0} account is already linked; remove it before linking another")]
    AccountMismatch(Provider),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl LinkError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::Configuration(_) => "configuration_error",
            LinkError::CsrfValidation(_) => "csrf_validation_failed",
            LinkError::ProviderAuth(_) => "provider_auth_failed",
            LinkError::CredentialUnusable { .. } => "reauthorization_required",
            LinkError::NotFound => "not_found",
            LinkError::ProviderNotConfigured(_) => "provider_not_configured",
            LinkError::AccountLinkedElsewhere(_) => "account_linked_elsewhere",
            LinkError::AccountMismatch(_) => "account_mismatch",
            LinkError::InvalidRequest(_) => "invalid_request",
            LinkError::Storage(_) => "storage_error",
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LinkedElsewhere(provider) => LinkError::AccountLinkedElsewhere(provider),
            StoreError::AccountMismatch(provider) => LinkError::AccountMismatch(provider),
            StoreError::Internal(e) => LinkError::Storage(e),
        }
    }
}

impl From<anyhow::Error> for LinkError {
    fn from(err: anyhow::Error) -> Self {
        LinkError::Storage(err)
    }
}
