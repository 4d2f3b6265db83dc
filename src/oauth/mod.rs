//! OAuth 2.0 authorization code flow for linking social accounts.
//!
//! 1. Caller asks for an authorization URL → signed `state` issued
//! 2. User consents on the provider's site
//! 3. Provider redirects back with `code` and `state`
//! 4. State verified (before anything else), code exchanged
//! 5. Credential upserted for (user, provider), public view returned

mod state;

pub use state::{run_state_cleanup, unverified_owner, StateClaims, StateManager};

use crate::credentials::{AccountView, CredentialStore, NewCredential, Provider};
use crate::error::LinkError;
use crate::provider::{ProviderAuthError, ProviderRegistry};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stage of a single linking attempt, recorded in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStage {
    Initiated,
    Redeemed,
    Linked,
    Failed,
}

impl fmt::Display for LinkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkStage::Initiated => "initiated",
            LinkStage::Redeemed => "redeemed",
            LinkStage::Linked => "linked",
            LinkStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Authorization URL plus the state the callback must echo back.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub state: String,
}

/// Drives authorization and code exchange for every registered provider.
#[derive(Clone)]
pub struct AuthorizationFlow {
    registry: ProviderRegistry,
    store: Arc<CredentialStore>,
    states: StateManager,
    provider_timeout: std::time::Duration,
}

impl AuthorizationFlow {
    pub fn new(
        registry: ProviderRegistry,
        store: Arc<CredentialStore>,
        states: StateManager,
    ) -> Self {
        Self {
            registry,
            store,
            states,
            provider_timeout: std::time::Duration::from_secs(15),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.states
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Issues a state bound to `owner_user_id` and builds the consent URL.
    /// No network call.
    pub fn start_authorization(
        &self,
        provider: Provider,
        owner_user_id: &str,
    ) -> Result<AuthorizationStart, LinkError> {
        if owner_user_id.is_empty() {
            return Err(LinkError::InvalidRequest("owner user id is empty".to_string()));
        }
        let adapter = self
            .registry
            .get(provider)
            .ok_or(LinkError::ProviderNotConfigured(provider))?;

        let state = self.states.issue(provider, owner_user_id);
        let authorization_url = adapter.build_authorization_url(&state);

        info!(
            provider = %provider,
            owner = %owner_user_id,
            stage = %LinkStage::Initiated,
            "Authorization URL issued"
        );

        Ok(AuthorizationStart {
            authorization_url,
            state,
        })
    }

    /// Completes the callback: verifies state, exchanges the code and
    /// persists the credential.
    ///
    /// The state check happens before the provider is contacted, and a
    /// failed exchange writes nothing.
    pub async fn complete_authorization(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
        requesting_user_id: &str,
    ) -> Result<AccountView, LinkError> {
        if code.trim().is_empty() {
            return Err(LinkError::InvalidRequest("missing 'code' parameter".to_string()));
        }
        if state.trim().is_empty() {
            return Err(LinkError::InvalidRequest("missing 'state' parameter".to_string()));
        }

        let adapter = self
            .registry
            .get(provider)
            .ok_or(LinkError::ProviderNotConfigured(provider))?;

        self.states
            .validate_and_consume(state, provider, requesting_user_id)
            .map_err(|e| {
                warn!(
                    provider = %provider,
                    requester = %requesting_user_id,
                    claimed_owner = ?unverified_owner(state),
                    stage = %LinkStage::Failed,
                    error = %e,
                    "OAuth state rejected"
                );
                e
            })?;
        debug!(provider = %provider, owner = %requesting_user_id, "CSRF state validated");

        let (exchanged, tokens) = match tokio::time::timeout(self.provider_timeout, adapter.exchange_code(code)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderAuthError::transient(
                provider,
                format!("code exchange timed out after {:?}", self.provider_timeout),
            )),
        }
        .and_then(|result| {
            if result.access_token.is_empty() {
                Err(ProviderAuthError::malformed(provider, "empty access token"))
            } else if result.provider_account_id.is_empty() {
                Err(ProviderAuthError::malformed(provider, "missing provider account id"))
            } else {
                let tokens = result.token_set(provider)?;
                Ok((result, tokens))
            }
        })
        .map_err(|e| {
            error!(
                provider = %provider,
                owner = %requesting_user_id,
                stage = %LinkStage::Failed,
                error = %e,
                "Code exchange failed"
            );
            LinkError::ProviderAuth(e)
        })?;

        debug!(
            provider = %provider,
            owner = %requesting_user_id,
            stage = %LinkStage::Redeemed,
            has_refresh_token = exchanged.refresh_token.is_some(),
            "Authorization code redeemed"
        );

        let credential = self
            .store
            .upsert(&NewCredential {
                owner_user_id: requesting_user_id.to_string(),
                provider,
                provider_account_id: exchanged.provider_account_id.clone(),
                display_name: exchanged.display_name.clone(),
                tokens,
            })
            .map_err(|e| {
                let e = LinkError::from(e);
                error!(
                    provider = %provider,
                    owner = %requesting_user_id,
                    stage = %LinkStage::Failed,
                    error = %e,
                    "Failed to persist social account"
                );
                e
            })?;

        info!(
            provider = %provider,
            owner = %requesting_user_id,
            account_id = %credential.id,
            stage = %LinkStage::Linked,
            "Social account linked"
        );

        Ok(credential.to_view())
    }
}
