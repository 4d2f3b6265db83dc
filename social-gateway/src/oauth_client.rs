//! OAuth 2.0 HTTP plumbing shared by every provider adapter.
//!
//! Wraps a `reqwest::Client` with a bounded timeout and turns every failure
//! into a [`ProviderAuthError`] of the right kind:
//!
//! - 4xx → `Rejected` (except 408 and 429, which are worth retrying)
//! - 5xx, connection failures, timeouts → `Transient`
//! - 2xx with a body that does not decode → `Malformed`

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use social_accounts::credentials::Provider;
use social_accounts::provider::ProviderAuthError;
use social_accounts::LinkError;
use std::time::Duration;
use tracing::debug;

/// Longest provider error body echoed into an error message
const MAX_ERROR_BODY: usize = 512;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// HTTP client for one provider's token and profile endpoints.
#[derive(Clone)]
pub struct OAuthHttpClient {
    provider: Provider,
    http: Client,
}

impl OAuthHttpClient {
    pub fn new(provider: Provider, timeout: Duration) -> Result<Self, LinkError> {
        let http = Client::builder()
            .user_agent(concat!("social-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                LinkError::Configuration(format!("failed to build HTTP client for {}: {}", provider, e))
            })?;

        Ok(Self { provider, http })
    }

    /// POSTs a form-encoded body, optionally with HTTP Basic client
    /// authentication, and decodes the JSON response.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
        basic_auth: Option<(&str, &str)>,
    ) -> Result<T, ProviderAuthError> {
        debug!(provider = %self.provider, url = %url, "POST to provider");

        let mut request = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .form(form);
        if let Some((username, password)) = basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        self.send(request).await
    }

    /// GETs a JSON document, authenticating with a bearer token or with
    /// query parameters (Graph-style `access_token=`).
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer_token: Option<&str>,
    ) -> Result<T, ProviderAuthError> {
        debug!(provider = %self.provider, url = %url, "GET from provider");

        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .query(query);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderAuthError> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(self.status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderAuthError::malformed(self.provider, format!("undecodable response: {}", e))
        })
    }

    fn status_error(&self, status: StatusCode, body: &str) -> ProviderAuthError {
        let mut excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
        if excerpt.len() < body.len() {
            excerpt.push('…');
        }
        let message = format!("status {}: {}", status, excerpt);

        let retryable = status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS;

        if retryable || !status.is_client_error() {
            ProviderAuthError::transient(self.provider, message)
        } else {
            ProviderAuthError::rejected(self.provider, message)
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderAuthError {
        if err.is_timeout() {
            ProviderAuthError::transient(self.provider, "request timed out")
        } else {
            ProviderAuthError::transient(self.provider, format!("request failed: {}", err))
        }
    }
}
