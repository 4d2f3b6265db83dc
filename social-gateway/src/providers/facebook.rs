//! Facebook Login via the Graph API.
//!
//! User access tokens are long-lived but Facebook issues no refresh
//! tokens: once one expires the user has to go through the dialog again.

use super::{ClientSettings, Endpoints};
use crate::oauth_client::{OAuthHttpClient, TokenResponse};
use async_trait::async_trait;
use serde::Deserialize;
use social_accounts::config::ProviderConfig;
use social_accounts::credentials::Provider;
use social_accounts::provider::{ExchangeResult, ProviderAdapter, ProviderAuthError, RefreshResult};
use social_accounts::LinkError;
use std::time::Duration;

pub(crate) const ENDPOINTS: Endpoints = Endpoints {
    authorize_url: "https://www.facebook.com/v18.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
    api_base_url: "https://graph.facebook.com/v18.0",
    scopes: &["public_profile", "email"],
};

#[derive(Debug, Deserialize)]
struct FacebookUser {
    id: String,
    name: String,
}

pub struct FacebookAdapter {
    settings: ClientSettings,
    http: OAuthHttpClient,
}

impl FacebookAdapter {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, LinkError> {
        Ok(Self {
            settings: ClientSettings::resolve(Provider::Facebook, config, &ENDPOINTS)?,
            http: OAuthHttpClient::new(Provider::Facebook, timeout)?,
        })
    }
}

#[async_trait]
impl ProviderAdapter for FacebookAdapter {
    fn identifier(&self) -> Provider {
        Provider::Facebook
    }

    fn build_authorization_url(&self, state: &str) -> String {
        self.settings.authorization_url(",", state, &[])
    }

    async fn exchange_code(&self, code: &str) -> Result<ExchangeResult, ProviderAuthError> {
        let token: TokenResponse = self
            .http
            .get_json(
                &self.settings.token_url,
                &[
                    ("client_id", self.settings.client_id.as_str()),
                    ("client_secret", self.settings.client_secret.as_str()),
                    ("redirect_uri", self.settings.redirect_uri.as_str()),
                    ("code", code),
                ],
                None,
            )
            .await?;

        let profile: FacebookUser = self
            .http
            .get_json(
                &format!("{}/me", self.settings.api_base_url),
                &[("fields", "id,name"), ("access_token", token.access_token.as_str())],
                None,
            )
            .await?;

        Ok(ExchangeResult {
            access_token: token.access_token,
            refresh_token: None,
            expires_in_seconds: token.expires_in,
            provider_account_id: profile.id,
            display_name: profile.name,
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
        Err(ProviderAuthError::rejected(
            Provider::Facebook,
            "Facebook does not issue refresh tokens; re-authorization required",
        ))
    }
}
