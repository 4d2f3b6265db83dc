//! Signed OAuth `state` tokens for CSRF protection.
//!
//! A state looks like `{owner}-{issued_at}-{nonce}-{signature}`. The owner
//! stays readable as the leading component, the signature is HMAC-SHA256 over
//! provider, owner, timestamp and nonce with a server secret, so a state can
//! neither be forged nor replayed on another provider's callback. Nonces are
//! single use: consumed ones are remembered until their TTL lapses.

use crate::credentials::Provider;
use crate::error::LinkError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LEN: usize = 32;
const NONCE_BYTES: usize = 16;
/// Tolerated clock drift for states issued "in the future".
const MAX_FUTURE_SKEW_SECONDS: i64 = 60;

/// Claims recovered from a verified state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateClaims {
    pub owner_user_id: String,
    pub provider: Provider,
    pub issued_at: DateTime<Utc>,
}

/// Issues and verifies state tokens, remembering consumed nonces.
#[derive(Clone)]
pub struct StateManager {
    mac: HmacSha256,
    ttl: Duration,
    consumed: Arc<DashMap<String, DateTime<Utc>>>,
}

impl StateManager {
    /// # Arguments
    /// * `secret` - Signing key, at least 32 bytes
    /// * `ttl_seconds` - How long a state stays redeemable (default: 600)
    pub fn new(secret: &[u8], ttl_seconds: i64) -> Result<Self, LinkError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(LinkError::Configuration(format!(
                "state signing secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                secret.len()
            )));
        }
        let ttl = Duration::try_seconds(ttl_seconds)
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| {
                LinkError::Configuration(format!("state TTL out of range: {}", ttl_seconds))
            })?;
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| LinkError::Configuration(format!("invalid state secret: {}", e)))?;

        Ok(Self {
            mac,
            ttl,
            consumed: Arc::new(DashMap::new()),
        })
    }

    pub fn issue(&self, provider: Provider, owner_user_id: &str) -> String {
        self.issue_at(provider, owner_user_id, Utc::now())
    }

    pub fn issue_at(&self, provider: Provider, owner_user_id: &str, now: DateTime<Utc>) -> String {
        let nonce = hex::encode(rand::thread_rng().gen::<[u8; NONCE_BYTES]>());
        let issued_at = now.timestamp();
        let signature = hex::encode(self.sign(provider, owner_user_id, issued_at, &nonce));

        format!("{}-{}-{}-{}", owner_user_id, issued_at, nonce, signature)
    }

    /// Verifies a state for `provider` and `requesting_user_id`, then
    /// consumes it.
    ///
    /// Checks run in this order: shape, signature, age, owner, single use.
    /// Nothing is consumed unless every other check passed.
    pub fn validate_and_consume(
        &self,
        state: &str,
        provider: Provider,
        requesting_user_id: &str,
    ) -> Result<StateClaims, LinkError> {
        self.validate_and_consume_at(state, provider, requesting_user_id, Utc::now())
    }

    pub fn validate_and_consume_at(
        &self,
        state: &str,
        provider: Provider,
        requesting_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StateClaims, LinkError> {
        let parts = ParsedState::parse(state)
            .ok_or_else(|| LinkError::CsrfValidation("malformed state".to_string()))?;

        let signature = hex::decode(parts.signature)
            .map_err(|_| LinkError::CsrfValidation("malformed state signature".to_string()))?;
        let mut mac = self.mac.clone();
        mac.update(&signing_input(
            provider,
            parts.owner,
            parts.issued_at,
            parts.nonce,
        ));
        mac.verify_slice(&signature)
            .map_err(|_| LinkError::CsrfValidation("state signature mismatch".to_string()))?;

        let issued_at = Utc
            .timestamp_opt(parts.issued_at, 0)
            .single()
            .ok_or_else(|| LinkError::CsrfValidation("invalid state timestamp".to_string()))?;
        if now - issued_at > self.ttl {
            return Err(LinkError::CsrfValidation("state expired".to_string()));
        }
        if issued_at - now > Duration::seconds(MAX_FUTURE_SKEW_SECONDS) {
            return Err(LinkError::CsrfValidation(
                "state issued in the future".to_string(),
            ));
        }

        if parts.owner != requesting_user_id {
            return Err(LinkError::CsrfValidation(
                "state was issued to a different user".to_string(),
            ));
        }

        match self.consumed.entry(parts.nonce.to_string()) {
            Entry::Occupied(_) => Err(LinkError::CsrfValidation(
                "state already used".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(issued_at + self.ttl);
                Ok(StateClaims {
                    owner_user_id: parts.owner.to_string(),
                    provider,
                    issued_at,
                })
            }
        }
    }

    /// Forgets consumed nonces whose states could no longer validate anyway.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.consumed.retain(|_, expires_at| *expires_at >= now);
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }

    fn sign(&self, provider: Provider, owner: &str, issued_at: i64, nonce: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(&signing_input(provider, owner, issued_at, nonce));
        mac.finalize().into_bytes().to_vec()
    }
}

/// Reads the owner component without verifying anything.
///
/// Only useful for logging; authorization decisions go through
/// [`StateManager::validate_and_consume`].
pub fn unverified_owner(state: &str) -> Option<&str> {
    ParsedState::parse(state).map(|p| p.owner)
}

fn signing_input(provider: Provider, owner: &str, issued_at: i64, nonce: &str) -> Vec<u8> {
    format!("{}\n{}\n{}\n{}", provider.as_str(), owner, issued_at, nonce).into_bytes()
}

struct ParsedState<'a> {
    owner: &'a str,
    issued_at: i64,
    nonce: &'a str,
    signature: &'a str,
}

impl<'a> ParsedState<'a> {
    /// Splits from the right so owner ids containing `-` survive.
    fn parse(state: &'a str) -> Option<Self> {
        let mut parts = state.rsplitn(4, '-');
        let signature = parts.next()?;
        let nonce = parts.next()?;
        let issued_at = parts.next()?.parse().ok()?;
        let owner = parts.next()?;

        if owner.is_empty() || nonce.len() != NONCE_BYTES * 2 || signature.is_empty() {
            return None;
        }

        Some(Self {
            owner,
            issued_at,
            nonce,
            signature,
        })
    }
}

/// Background task to periodically prune consumed nonces.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(
            remaining = manager.consumed_count(),
            "OAuth state cleanup complete"
        );
    }
}
