//! Social Gateway - runnable integration of the social account core.
//!
//! Provides the concrete Twitter/X, Facebook and Instagram adapters and
//! the wiring that turns a [`ServiceConfig`] plus secrets into a ready
//! [`AppState`].

pub mod oauth_client;
pub mod providers;
pub mod registry;

use anyhow::{Context, Result};
use social_accounts::accounts::AccountDirectory;
use social_accounts::api::AppState;
use social_accounts::auth::StaticTokenResolver;
use social_accounts::config::ServiceConfig;
use social_accounts::credentials::CredentialStore;
use social_accounts::freshness::FreshnessGuard;
use social_accounts::oauth::{AuthorizationFlow, StateManager};
use social_accounts::LinkError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Secrets that never live in the config file.
pub struct Secrets {
    /// Base64-encoded 32-byte AES key for tokens at rest
    pub encryption_key: String,
    /// HMAC key for OAuth state, at least 32 bytes
    pub state_secret: String,
}

/// Builds every component of the service from configuration.
pub fn build_app_state(config: &ServiceConfig, secrets: &Secrets) -> Result<AppState> {
    let store = Arc::new(
        CredentialStore::new(&config.storage.database_path, &secrets.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!(path = %config.storage.database_path, "Credential store initialized");

    let registry =
        registry::build_registry(config).context("Failed to configure provider adapters")?;
    if registry.is_empty() {
        warn!("No providers configured; account linking is unavailable");
    }

    let states = StateManager::new(
        secrets.state_secret.as_bytes(),
        config.oauth.state_ttl_seconds,
    )
    .context("Invalid OAuth state configuration")?;

    let provider_timeout = Duration::from_secs(config.oauth.provider_timeout_seconds.max(1));
    let refresh_skew = chrono::Duration::try_seconds(config.oauth.refresh_skew_seconds)
        .filter(|skew| *skew >= chrono::Duration::zero())
        .ok_or_else(|| {
            LinkError::Configuration(format!(
                "refresh_skew_seconds out of range: {}",
                config.oauth.refresh_skew_seconds
            ))
        })?;

    let flow = AuthorizationFlow::new(registry.clone(), Arc::clone(&store), states)
        .with_provider_timeout(provider_timeout);
    let guard = FreshnessGuard::new(Arc::clone(&store), registry)
        .with_skew(refresh_skew)
        .with_provider_timeout(provider_timeout)
        .with_max_transient_failures(config.oauth.max_transient_refresh_failures);

    let identity = StaticTokenResolver::new(config.auth.tokens.clone());
    if identity.is_empty() {
        warn!("No bearer tokens configured; every account request will be rejected");
    } else {
        info!(tokens = identity.len(), "Static identity resolver loaded");
    }

    Ok(AppState {
        flow,
        guard,
        accounts: AccountDirectory::new(store),
        identity: Arc::new(identity),
    })
}
