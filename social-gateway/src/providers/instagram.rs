//! Instagram Basic Display.
//!
//! The code exchange yields a short-lived token (about an hour) which is
//! immediately traded for a long-lived one (about 60 days). Instagram has
//! no separate refresh token: an unexpired long-lived token is itself the
//! refresh grant, so it is stored in both slots.

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
    authorize_url: "https://api.instagram.com/oauth/authorize",
    token_url: "https://api.instagram.com/oauth/access_token",
    api_base_url: "https://graph.instagram.com",
    scopes: &["user_profile", "user_media"],
};

#[derive(Debug, Deserialize)]
struct InstagramUser {
    id: String,
    username: String,
}

pub struct InstagramAdapter {
    settings: ClientSettings,
    http: OAuthHttpClient,
}

impl InstagramAdapter {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, LinkError> {
        Ok(Self {
            settings: ClientSettings::resolve(Provider::Instagram, config, &ENDPOINTS)?,
            http: OAuthHttpClient::new(Provider::Instagram, timeout)?,
        })
    }

    async fn upgrade_to_long_lived(&self, short_lived: &str) -> Result<TokenResponse, ProviderAuthError> {
        self.http
            .get_json(
                &format!("{}/access_token", self.settings.api_base_url),
                &[
                    ("grant_type", "ig_exchange_token"),
                    ("client_secret", self.settings.client_secret.as_str()),
                    ("access_token", short_lived),
                ],
                None,
            )
            .await
    }
}

#[async_trait]
impl ProviderAdapter for InstagramAdapter {
    fn identifier(&self) -> Provider {
        Provider::Instagram
    }

    fn build_authorization_url(&self, state: &str) -> String {
        self.settings.authorization_url(",", state, &[])
    }

    async fn exchange_code(&self, code: &str) -> Result<ExchangeResult, ProviderAuthError> {
        let short_lived: TokenResponse = self
            .http
            .post_form(
                &self.settings.token_url,
                &[
                    ("client_id", self.settings.client_id.as_str()),
                    ("client_secret", self.settings.client_secret.as_str()),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.settings.redirect_uri.as_str()),
                    ("code", code),
                ],
                None,
            )
            .await?;

        let long_lived = self.upgrade_to_long_lived(&short_lived.access_token).await?;

        let profile: InstagramUser = self
            .http
            .get_json(
                &format!("{}/me", self.settings.api_base_url),
                &[("fields", "id,username"), ("access_token", long_lived.access_token.as_str())],
                None,
            )
            .await?;

        Ok(ExchangeResult {
            refresh_token: Some(long_lived.access_token.clone()),
            access_token: long_lived.access_token,
            expires_in_seconds: long_lived.expires_in,
            provider_account_id: profile.id,
            display_name: profile.username,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
        if refresh_token.is_empty() {
            return Err(ProviderAuthError::rejected(Provider::Instagram, "no long-lived token"));
        }

        let token: TokenResponse = self
            .http
            .get_json(
                &format!("{}/refresh_access_token", self.settings.api_base_url),
                &[("grant_type", "ig_refresh_token"), ("access_token", refresh_token)],
                None,
            )
            .await?;

        Ok(RefreshResult {
            refresh_token: Some(token.access_token.clone()),
            access_token: token.access_token,
            expires_in_seconds: token.expires_in,
        })
    }
}
