//! Token freshness guard.
//!
//! Every caller that is about to use an access token against a provider API
//! goes through [`FreshnessGuard::ensure_fresh`]. It is the single place that
//! decides whether a stored token is good enough, refreshes it when it is
//! not, and persists the outcome.

use crate::credentials::{AccountStatus, Credential, CredentialStore, Provider};
use crate::error::LinkError;
use crate::provider::{ProviderAuthError, ProviderRegistry};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Default window before expiry in which a token is refreshed proactively.
pub const DEFAULT_REFRESH_SKEW_SECONDS: i64 = 3600;

/// Outcome of [`classify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Hand the access token out as-is.
    Usable,
    /// Refresh before use.
    NeedsRefresh,
    /// Nothing can be done without the user re-authorizing.
    Unusable(String),
}

/// Decides what a credential needs before its access token may be used.
///
/// A missing expiry means "refresh before every use", never "never expires".
/// A token without a refresh token that has not expired yet stays usable
/// even inside the skew window, since there is nothing to refresh it with.
pub fn classify(credential: &Credential, now: DateTime<Utc>, skew: Duration) -> Freshness {
    match credential.status {
        AccountStatus::Active => {}
        status => {
            return Freshness::Unusable(format!("account status is {}", status.as_str()));
        }
    }

    let has_refresh = credential
        .refresh_token
        .as_deref()
        .is_some_and(|t| !t.is_empty());

    if credential.access_token.is_empty() {
        return if has_refresh {
            Freshness::NeedsRefresh
        } else {
            Freshness::Unusable("no access token and no refresh token".to_string())
        };
    }

    match credential.access_token_expires_at {
        Some(expires_at) if expires_at > now + skew => Freshness::Usable,
        _ if has_refresh => Freshness::NeedsRefresh,
        Some(expires_at) if expires_at > now => Freshness::Usable,
        Some(_) => Freshness::Unusable("access token expired and no refresh token".to_string()),
        None => Freshness::Unusable("access token has no expiry and no refresh token".to_string()),
    }
}

type RefreshKey = (String, Provider);

/// Refreshes credentials on demand, one provider call per credential at a time.
#[derive(Clone)]
pub struct FreshnessGuard {
    store: Arc<CredentialStore>,
    registry: ProviderRegistry,
    skew: Duration,
    provider_timeout: std::time::Duration,
    max_transient_failures: u32,
    in_flight: Arc<DashMap<RefreshKey, Arc<Mutex<()>>>>,
    transient_failures: Arc<DashMap<Uuid, u32>>,
}

impl FreshnessGuard {
    pub fn new(store: Arc<CredentialStore>, registry: ProviderRegistry) -> Self {
        Self {
            store,
            registry,
            skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECONDS),
            provider_timeout: std::time::Duration::from_secs(15),
            max_transient_failures: 3,
            in_flight: Arc::new(DashMap::new()),
            transient_failures: Arc::new(DashMap::new()),
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Consecutive transient refresh failures tolerated before the
    /// credential is marked `error`.
    pub fn with_max_transient_failures(mut self, max: u32) -> Self {
        self.max_transient_failures = max.max(1);
        self
    }

    pub fn classify(&self, credential: &Credential) -> Freshness {
        classify(credential, Utc::now(), self.skew)
    }

    /// Loads the owner's credential for `provider` and makes it usable.
    pub async fn ensure_fresh_for(
        &self,
        owner_user_id: &str,
        provider: Provider,
    ) -> Result<Credential, LinkError> {
        let credential = self
            .store
            .find_by_owner_and_provider(owner_user_id, provider)?
            .ok_or(LinkError::NotFound)?;
        self.ensure_fresh(credential).await
    }

    /// Returns a credential whose access token may be used right now.
    ///
    /// - `Usable`: returned untouched, no provider call, no write.
    /// - `NeedsRefresh`: refreshed through the adapter and written back.
    ///   A rejected refresh token marks the account `error` and yields
    ///   [`LinkError::CredentialUnusable`]; a transient failure leaves the
    ///   stored record alone and yields [`LinkError::ProviderAuth`].
    /// - `Unusable`: fails without calling the provider.
    ///
    /// Anything short of `Usable` is decided again on a fresh read under the
    /// per-key lock, so a relink that landed after `credential` was loaded
    /// is never overwritten.
    pub async fn ensure_fresh(&self, credential: Credential) -> Result<Credential, LinkError> {
        if self.classify(&credential) == Freshness::Usable {
            return Ok(credential);
        }

        let key = (credential.owner_user_id.clone(), credential.provider);
        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(credential.id).await
        };

        drop(lock);
        self.in_flight
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Drops the consecutive transient failure count of an account. Called
    /// when the account is relinked or removed.
    pub fn clear_failures(&self, id: Uuid) {
        self.transient_failures.remove(&id);
    }

    /// Runs with the per-key lock held. Re-reads the record first so a
    /// caller that waited behind another refresh reuses its result.
    async fn refresh_locked(&self, id: Uuid) -> Result<Credential, LinkError> {
        let Some(current) = self.store.find_by_id(id)? else {
            self.clear_failures(id);
            return Err(LinkError::NotFound);
        };

        match self.classify(&current) {
            Freshness::Usable => {
                debug!(account_id = %id, "Credential already fresh on re-read");
                return Ok(current);
            }
            Freshness::Unusable(reason) => return Err(self.unusable(&current, reason)),
            Freshness::NeedsRefresh => {}
        }

        let provider = current.provider;
        let adapter = self
            .registry
            .get(provider)
            .ok_or(LinkError::ProviderNotConfigured(provider))?;
        let refresh_token = current.refresh_token.clone().unwrap_or_default();

        info!(
            account_id = %id,
            owner = %current.owner_user_id,
            provider = %provider,
            "Refreshing access token"
        );

        let outcome = match tokio::time::timeout(self.provider_timeout, adapter.refresh(&refresh_token)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderAuthError::transient(
                provider,
                format!("refresh timed out after {:?}", self.provider_timeout),
            )),
        }
        .and_then(|refreshed| refreshed.token_set(provider, current.refresh_token.as_deref()));

        match outcome {
            Ok(tokens) => {
                self.clear_failures(id);
                let updated = self
                    .store
                    .update_tokens(id, &tokens)?
                    .ok_or(LinkError::NotFound)?;
                info!(
                    account_id = %id,
                    provider = %provider,
                    expires_at = ?updated.access_token_expires_at,
                    "Access token refreshed"
                );
                Ok(updated)
            }
            Err(err) if err.is_permanent() => {
                self.clear_failures(id);
                warn!(account_id = %id, provider = %provider, error = %err, "Refresh token rejected");
                self.mark_error(&current, &err.to_string())?;
                Err(LinkError::CredentialUnusable {
                    provider,
                    reason: err.message,
                })
            }
            Err(err) => {
                let failures = {
                    let mut count = self.transient_failures.entry(id).or_insert(0);
                    *count += 1;
                    *count
                };
                warn!(
                    account_id = %id,
                    provider = %provider,
                    error = %err,
                    failures,
                    "Token refresh failed"
                );

                if failures >= self.max_transient_failures {
                    self.clear_failures(id);
                    let reason = format!(
                        "refresh failed {} times in a row: {}",
                        failures, err.message
                    );
                    self.mark_error(&current, &reason)?;
                    return Err(LinkError::CredentialUnusable { provider, reason });
                }
                Err(LinkError::ProviderAuth(err))
            }
        }
    }

    /// Flips a still-active but dead credential to `error` and builds the error.
    fn unusable(&self, credential: &Credential, reason: String) -> LinkError {
        if credential.status == AccountStatus::Active {
            if let Err(e) = self.mark_error(credential, &reason) {
                warn!(account_id = %credential.id, error = %e, "Failed to record unusable credential");
            }
        }
        debug!(account_id = %credential.id, reason = %reason, "Credential unusable");
        LinkError::CredentialUnusable {
            provider: credential.provider,
            reason,
        }
    }

    /// Marks `credential` as `error` unless it was rewritten since it was read.
    fn mark_error(&self, credential: &Credential, reason: &str) -> Result<(), LinkError> {
        let applied = self.store.mark_status(
            credential.id,
            AccountStatus::Error,
            Some(reason),
            credential.updated_at,
        )?;
        if !applied {
            debug!(account_id = %credential.id, "Credential changed meanwhile, status left as is");
        }
        Ok(())
    }
}
