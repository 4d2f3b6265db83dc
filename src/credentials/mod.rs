//! Linked social account credentials.
//!
//! One [`Credential`] exists per (owner, provider) pair. The full record,
//! tokens included, only ever travels between the store, the authorization
//! flow and the freshness guard. Everything that leaves the core is an
//! [`AccountView`], which has no token fields at all.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - upsert / lookups / scoped delete      │
//! │  - uniqueness enforced by SQLite         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!      (seal)                (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM, nonce per token          │
//! └─────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod encryption;
mod storage;

pub use encryption::{SealedToken, TokenCipher};
pub use storage::{CredentialStore, StoreError};

/// Social platform an account is linked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Twitter,
    Facebook,
    Instagram,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Twitter, Provider::Facebook, Provider::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Twitter => "twitter",
            Provider::Facebook => "facebook",
            Provider::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Provider::Twitter),
            "facebook" => Ok(Provider::Facebook),
            "instagram" => Ok(Provider::Instagram),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Whether a linked account is offered to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Revoked,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
        }
    }
}

/// Returned when a string names no known account status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown account status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AccountStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "revoked" => Ok(AccountStatus::Revoked),
            "error" => Ok(AccountStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Token material issued by a provider.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Input to [`CredentialStore::upsert`] after a successful code exchange.
#[derive(Clone, Debug)]
pub struct NewCredential {
    pub owner_user_id: String,
    pub provider: Provider,
    pub provider_account_id: String,
    pub display_name: String,
    pub tokens: TokenSet,
}

/// Full credential record, secrets included.
///
/// Deliberately not `Serialize`: convert with [`Credential::to_view`]
/// before anything crosses the HTTP boundary.
#[derive(Clone)]
pub struct Credential {
    pub id: Uuid,
    pub owner_user_id: String,
    pub provider: Provider,
    pub provider_account_id: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Projection without token material.
    pub fn to_view(&self) -> AccountView {
        AccountView {
            id: self.id,
            owner_user_id: self.owner_user_id.clone(),
            provider: self.provider,
            provider_account_id: self.provider_account_id.clone(),
            display_name: self.display_name.clone(),
            access_token_expires_at: self.access_token_expires_at,
            status: self.status,
            last_error: self.last_error.clone(),
            last_synced_at: self.last_synced_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("owner_user_id", &self.owner_user_id)
            .field("provider", &self.provider)
            .field("provider_account_id", &self.provider_account_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Public, secret-free view of a linked account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub owner_user_id: String,
    pub provider: Provider,
    pub provider_account_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
