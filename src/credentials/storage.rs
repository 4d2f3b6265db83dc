//! Encrypted social account storage using SQLite.
//!
//! Tokens are sealed with AES-256-GCM before they touch disk. Listing
//! operations never select the token columns.

use super::{
    AccountStatus, AccountView, Credential, NewCredential, Provider, SealedToken, TokenCipher,
    TokenSet,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Failures of [`CredentialStore::upsert`] that callers act on.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The provider-side account already belongs to another platform user.
    #[error("this {0} account is already linked to another user")]
    LinkedElsewhere(Provider),

    /// The owner already has a different provider-side account linked.
    #[error("a different {0} account is already linked; remove it before linking another")]
    AccountMismatch(Provider),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS social_accounts (
    id TEXT PRIMARY KEY,
    owner_user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    access_token TEXT NOT NULL,
    access_token_nonce TEXT NOT NULL,
    refresh_token TEXT,
    refresh_token_nonce TEXT,
    access_token_expires_at TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    last_error TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner_user_id, provider),
    UNIQUE(provider, provider_account_id)
)
"#;

const FULL_COLUMNS: &str = "id, owner_user_id, provider, provider_account_id, display_name, \
     access_token_expires_at, status, last_error, last_synced_at, created_at, updated_at, \
     access_token, access_token_nonce, refresh_token, refresh_token_nonce";

const VIEW_COLUMNS: &str = "id, owner_user_id, provider, provider_account_id, display_name, \
     access_token_expires_at, status, last_error, last_synced_at, created_at, updated_at";

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE social_accounts (
///     id TEXT PRIMARY KEY,                 -- UUID v7
///     owner_user_id TEXT NOT NULL,
///     provider TEXT NOT NULL,              -- twitter | facebook | instagram
///     provider_account_id TEXT NOT NULL,
///     display_name TEXT NOT NULL,
///     access_token TEXT NOT NULL,          -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,                  -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     access_token_expires_at TEXT,        -- RFC 3339 (optional)
///     status TEXT NOT NULL,                -- active | inactive | revoked | error
///     last_error TEXT,
///     last_synced_at TEXT,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(owner_user_id, provider),
///     UNIQUE(provider, provider_account_id)
/// );
/// ```
///
/// # Thread Safety
/// The connection sits behind a `Mutex`, so every statement is serialized.
/// Uniqueness is still enforced by SQLite itself: `upsert` is a single
/// `INSERT ... ON CONFLICT ... DO UPDATE` statement.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl CredentialStore {
    /// Creates or opens a store.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute(SCHEMA, [])
            .context("Failed to create social_accounts table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_social_accounts_owner ON social_accounts(owner_user_id)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("credential store connection mutex poisoned"))
    }

    /// Inserts or replaces the credential for (owner, provider).
    ///
    /// On reconnection the token fields, display name and sync time are
    /// overwritten and the status resets to `active`. The provider account
    /// id never changes: linking a different provider-side account onto an
    /// existing link fails with [`StoreError::AccountMismatch`].
    pub fn upsert(&self, new: &NewCredential) -> Result<Credential, StoreError> {
        let access = self
            .cipher
            .seal(&new.tokens.access_token)
            .context("Failed to encrypt access token")?;
        let refresh = self.seal_optional(new.tokens.refresh_token.as_deref())?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let expires_at = new.tokens.expires_at.map(|dt| dt.to_rfc3339());
        let candidate_id = Uuid::now_v7();

        let conn = self.conn()?;
        let result = conn
            .query_row(
                r#"
                INSERT INTO social_accounts (
                    id, owner_user_id, provider, provider_account_id, display_name,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    access_token_expires_at, status, last_error,
                    last_synced_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', NULL, ?11, ?11, ?11)
                ON CONFLICT(owner_user_id, provider) DO UPDATE SET
                    display_name = excluded.display_name,
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    access_token_expires_at = excluded.access_token_expires_at,
                    status = 'active',
                    last_error = NULL,
                    last_synced_at = excluded.last_synced_at,
                    updated_at = excluded.updated_at
                WHERE social_accounts.provider_account_id = excluded.provider_account_id
                RETURNING id, created_at
                "#,
                params![
                    candidate_id.to_string(),
                    new.owner_user_id,
                    new.provider.as_str(),
                    new.provider_account_id,
                    new.display_name,
                    access.ciphertext,
                    access.nonce,
                    refresh.as_ref().map(|s| s.ciphertext.as_str()),
                    refresh.as_ref().map(|s| s.nonce.as_str()),
                    expires_at,
                    now_str,
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();

        let (id, created_at) = match result {
            Ok(Some(row)) => row,
            // DO UPDATE's WHERE rejected the row: same owner, different account.
            Ok(None) => return Err(StoreError::AccountMismatch(new.provider)),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::LinkedElsewhere(new.provider));
            }
            Err(e) => {
                return Err(StoreError::Internal(
                    anyhow::Error::new(e).context("Failed to upsert social account"),
                ))
            }
        };

        Ok(Credential {
            id: parse_uuid(&id)?,
            owner_user_id: new.owner_user_id.clone(),
            provider: new.provider,
            provider_account_id: new.provider_account_id.clone(),
            display_name: new.display_name.clone(),
            access_token: new.tokens.access_token.clone(),
            refresh_token: new.tokens.refresh_token.clone(),
            access_token_expires_at: new.tokens.expires_at,
            status: AccountStatus::Active,
            last_error: None,
            last_synced_at: Some(now),
            created_at: parse_timestamp(&created_at)?,
            updated_at: now,
        })
    }

    /// Writes refreshed tokens back, reactivating the credential.
    ///
    /// Returns the updated record, or `None` if it was removed meanwhile.
    pub fn update_tokens(&self, id: Uuid, tokens: &TokenSet) -> Result<Option<Credential>> {
        let access = self
            .cipher
            .seal(&tokens.access_token)
            .context("Failed to encrypt access token")?;
        let refresh = self.seal_optional(tokens.refresh_token.as_deref())?;
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn()?
            .execute(
                r#"
                UPDATE social_accounts SET
                    access_token = ?2,
                    access_token_nonce = ?3,
                    refresh_token = ?4,
                    refresh_token_nonce = ?5,
                    access_token_expires_at = ?6,
                    status = 'active',
                    last_error = NULL,
                    last_synced_at = ?7,
                    updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    access.ciphertext,
                    access.nonce,
                    refresh.as_ref().map(|s| s.ciphertext.as_str()),
                    refresh.as_ref().map(|s| s.nonce.as_str()),
                    tokens.expires_at.map(|dt| dt.to_rfc3339()),
                    now,
                ],
            )
            .context("Failed to update tokens")?;

        if updated == 0 {
            return Ok(None);
        }
        self.find_by_id(id)
    }

    /// Sets status and diagnostic without touching token material.
    ///
    /// Only applies while the record still carries `seen_updated_at`: a
    /// relink or refresh written after the caller's read wins, and `false`
    /// is returned.
    pub fn mark_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        last_error: Option<&str>,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE social_accounts SET status = ?2, last_error = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND updated_at = ?5",
                params![
                    id.to_string(),
                    status.as_str(),
                    last_error,
                    Utc::now().to_rfc3339(),
                    seen_updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to update account status")?;

        Ok(updated > 0)
    }

    /// Full record, tokens decrypted. For provider calls only.
    pub fn find_by_owner_and_provider(
        &self,
        owner_user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM social_accounts WHERE owner_user_id = ?1 AND provider = ?2",
                FULL_COLUMNS
            ))
            .context("Failed to prepare query")?;
        let mut rows = stmt
            .query(params![owner_user_id, provider.as_str()])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(self.read_credential(row)?)),
            None => Ok(None),
        }
    }

    /// Full record, tokens decrypted. For provider calls only.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM social_accounts WHERE id = ?1",
                FULL_COLUMNS
            ))
            .context("Failed to prepare query")?;
        let mut rows = stmt
            .query(params![id.to_string()])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(self.read_credential(row)?)),
            None => Ok(None),
        }
    }

    /// Secret-free listing of an owner's accounts, optionally for one provider.
    pub fn list_by_owner(
        &self,
        owner_user_id: &str,
        provider: Option<Provider>,
    ) -> Result<Vec<AccountView>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM social_accounts \
                 WHERE owner_user_id = ?1 AND (?2 IS NULL OR provider = ?2) \
                 ORDER BY provider",
                VIEW_COLUMNS
            ))
            .context("Failed to prepare query")?;
        let mut rows = stmt
            .query(params![owner_user_id, provider.map(|p| p.as_str())])
            .context("Failed to execute query")?;

        let mut views = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            views.push(read_view(row)?);
        }
        Ok(views)
    }

    /// Deletes a credential only if `owner_user_id` owns it.
    ///
    /// Returns the number of rows removed: 0 for both "no such account" and
    /// "someone else's account".
    pub fn delete_by_owner_and_id(&self, owner_user_id: &str, id: Uuid) -> Result<usize> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM social_accounts WHERE id = ?1 AND owner_user_id = ?2",
                params![id.to_string(), owner_user_id],
            )
            .context("Failed to delete social account")?;

        Ok(removed)
    }

    fn seal_optional(&self, token: Option<&str>) -> Result<Option<SealedToken>> {
        token
            .map(|t| self.cipher.seal(t))
            .transpose()
            .context("Failed to encrypt refresh token")
    }

    fn read_credential(&self, row: &Row<'_>) -> Result<Credential> {
        let view = read_view(row)?;

        let access_token = self
            .cipher
            .open(&SealedToken {
                ciphertext: row.get(11)?,
                nonce: row.get(12)?,
            })
            .context("Failed to decrypt access token")?;

        let refresh_ciphertext: Option<String> = row.get(13)?;
        let refresh_nonce: Option<String> = row.get(14)?;
        let refresh_token = match (refresh_ciphertext, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                self.cipher
                    .open(&SealedToken { ciphertext, nonce })
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        Ok(Credential {
            id: view.id,
            owner_user_id: view.owner_user_id,
            provider: view.provider,
            provider_account_id: view.provider_account_id,
            display_name: view.display_name,
            access_token,
            refresh_token,
            access_token_expires_at: view.access_token_expires_at,
            status: view.status,
            last_error: view.last_error,
            last_synced_at: view.last_synced_at,
            created_at: view.created_at,
            updated_at: view.updated_at,
        })
    }
}

fn read_view(row: &Row<'_>) -> Result<AccountView> {
    let id: String = row.get(0)?;
    let provider: String = row.get(2)?;
    let status: String = row.get(6)?;
    let expires_at: Option<String> = row.get(5)?;
    let last_synced_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(AccountView {
        id: parse_uuid(&id)?,
        owner_user_id: row.get(1)?,
        provider: provider
            .parse()
            .with_context(|| format!("Corrupt provider column for account {}", id))?,
        provider_account_id: row.get(3)?,
        display_name: row.get(4)?,
        access_token_expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        status: status
            .parse()
            .with_context(|| format!("Corrupt status column for account {}", id))?,
        last_error: row.get(7)?,
        last_synced_at: last_synced_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Failed to parse account id '{}'", value))
}
