//! Twitter/X OAuth 2.0 with PKCE.
//!
//! Confidential client: the token endpoint authenticates with HTTP Basic
//! (`client_id:client_secret`). `offline.access` is requested so the
//! provider issues rotating refresh tokens.

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
    authorize_url: "https://twitter.com/i/oauth2/authorize",
    token_url: "https://api.twitter.com/2/oauth2/token",
    api_base_url: "https://api.twitter.com",
    scopes: &[
        "tweet.read",
        "tweet.write",
        "users.read",
        "follows.read",
        "follows.write",
        "offline.access",
    ],
};

const DEFAULT_CODE_VERIFIER: &str = "challenge";

/// `GET /2/users/me` response
#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
}

pub struct TwitterAdapter {
    settings: ClientSettings,
    code_verifier: String,
    http: OAuthHttpClient,
}

impl TwitterAdapter {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, LinkError> {
        let settings = ClientSettings::resolve(Provider::Twitter, config, &ENDPOINTS)?;
        let code_verifier = config
            .code_verifier
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CODE_VERIFIER.to_string());

        Ok(Self {
            settings,
            code_verifier,
            http: OAuthHttpClient::new(Provider::Twitter, timeout)?,
        })
    }

    fn client_auth(&self) -> Option<(&str, &str)> {
        Some((self.settings.client_id.as_str(), self.settings.client_secret.as_str()))
    }
}

#[async_trait]
impl ProviderAdapter for TwitterAdapter {
    fn identifier(&self) -> Provider {
        Provider::Twitter
    }

    fn build_authorization_url(&self, state: &str) -> String {
        self.settings.authorization_url(
            " ",
            state,
            &[
                ("code_challenge", self.code_verifier.as_str()),
                ("code_challenge_method", "plain"),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ExchangeResult, ProviderAuthError> {
        let token: TokenResponse = self
            .http
            .post_form(
                &self.settings.token_url,
                &[
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("client_id", self.settings.client_id.as_str()),
                    ("redirect_uri", self.settings.redirect_uri.as_str()),
                    ("code_verifier", self.code_verifier.as_str()),
                ],
                self.client_auth(),
            )
            .await?;

        let profile: UserEnvelope = self
            .http
            .get_json(
                &format!("{}/2/users/me", self.settings.api_base_url),
                &[],
                Some(token.access_token.as_str()),
            )
            .await?;

        Ok(ExchangeResult {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_seconds: token.expires_in,
            provider_account_id: profile.data.id,
            display_name: profile.data.username,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
        if refresh_token.is_empty() {
            return Err(ProviderAuthError::rejected(Provider::Twitter, "no refresh token"));
        }

        let token: TokenResponse = self
            .http
            .post_form(
                &self.settings.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.settings.client_id.as_str()),
                ],
                self.client_auth(),
            )
            .await?;

        Ok(RefreshResult {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_seconds: token.expires_in,
        })
    }
}
