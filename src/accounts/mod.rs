//! Owner-scoped read and delete operations on linked accounts.

use crate::credentials::{AccountView, CredentialStore, Provider};
use crate::error::LinkError;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AccountDirectory {
    store: Arc<CredentialStore>,
}

impl AccountDirectory {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// The owner's linked accounts, secrets stripped.
    pub fn list_accounts(
        &self,
        owner_user_id: &str,
        provider: Option<Provider>,
    ) -> Result<Vec<AccountView>, LinkError> {
        let accounts = self.store.list_by_owner(owner_user_id, provider)?;
        debug!(
            owner = %owner_user_id,
            provider = ?provider,
            count = accounts.len(),
            "Listed social accounts"
        );
        Ok(accounts)
    }

    /// Unlinks an account if and only if `owner_user_id` owns it.
    ///
    /// Returns the number of rows removed. Someone else's account and an
    /// account that never existed both report 0.
    pub fn remove_account(&self, owner_user_id: &str, account_id: Uuid) -> Result<usize, LinkError> {
        let removed = self.store.delete_by_owner_and_id(owner_user_id, account_id)?;
        if removed > 0 {
            info!(owner = %owner_user_id, account_id = %account_id, "Social account unlinked");
        } else {
            debug!(owner = %owner_user_id, account_id = %account_id, "Nothing to unlink");
        }
        Ok(removed)
    }
}
