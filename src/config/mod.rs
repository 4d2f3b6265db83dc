//! Service configuration.
//!
//! Non-secret settings come from a TOML file; the encryption key, the state
//! signing secret and (optionally) provider client credentials come from
//! the environment. Every section has defaults so an empty file is valid.

use crate::credentials::Provider;
use crate::error::LinkError;
use serde::Deserialize;
use std::collections::HashMap;

pub const CONFIG_PATH_ENV: &str = "SOCIAL_ACCOUNTS_CONFIG";
pub const ENCRYPTION_KEY_ENV: &str = "SOCIAL_ENCRYPTION_KEY";
pub const STATE_SECRET_ENV: &str = "SOCIAL_STATE_SECRET";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Dashboard origin allowed by CORS
    #[serde(default = "default_cors_allowed_origin")]
    pub cors_allowed_origin: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cors_allowed_origin() -> String {
    "http://localhost:3001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_allowed_origin: default_cors_allowed_origin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "social_accounts.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// OAuth flow and token freshness tuning
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// Refresh tokens this long before they expire
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: i64,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,
    #[serde(default = "default_max_transient_failures")]
    pub max_transient_refresh_failures: u32,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_refresh_skew() -> i64 {
    3600
}

fn default_provider_timeout() -> u64 {
    15
}

fn default_max_transient_failures() -> u32 {
    3
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            refresh_skew_seconds: default_refresh_skew(),
            provider_timeout_seconds: default_provider_timeout(),
            max_transient_refresh_failures: default_max_transient_failures(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Bearer token → user id table for the static identity resolver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub twitter: Option<ProviderConfig>,
    pub facebook: Option<ProviderConfig>,
    pub instagram: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> Option<&ProviderConfig> {
        match provider {
            Provider::Twitter => self.twitter.as_ref(),
            Provider::Facebook => self.facebook.as_ref(),
            Provider::Instagram => self.instagram.as_ref(),
        }
    }

    fn slot_mut(&mut self, provider: Provider) -> &mut Option<ProviderConfig> {
        match provider {
            Provider::Twitter => &mut self.twitter,
            Provider::Facebook => &mut self.facebook,
            Provider::Instagram => &mut self.instagram,
        }
    }
}

/// OAuth client settings for one provider.
///
/// Endpoint URLs and scopes fall back to the provider's public defaults
/// when omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub api_base_url: Option<String>,
    pub scopes: Option<Vec<String>>,
    /// PKCE verifier for providers that require one
    pub code_verifier: Option<String>,
}

impl ProviderConfig {
    /// Ensures the values every adapter needs are present.
    pub fn require_basics(&self, provider: Provider) -> Result<(), LinkError> {
        let missing: Vec<&str> = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(LinkError::Configuration(format!(
                "{} provider is missing {}",
                provider,
                missing.join(", ")
            )))
        }
    }
}

impl ServiceConfig {
    /// Overlays `{PROVIDER}_CLIENT_ID` / `{PROVIDER}_CLIENT_SECRET` /
    /// `{PROVIDER}_REDIRECT_URI` onto the file values. Setting any of them
    /// enables the provider even without a file section.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in Provider::ALL {
            let prefix = provider.as_str().to_uppercase();
            let client_id = lookup(&format!("{}_CLIENT_ID", prefix));
            let client_secret = lookup(&format!("{}_CLIENT_SECRET", prefix));
            let redirect_uri = lookup(&format!("{}_REDIRECT_URI", prefix));

            if client_id.is_none() && client_secret.is_none() && redirect_uri.is_none() {
                continue;
            }

            let slot = self.providers.slot_mut(provider);
            let config = slot.get_or_insert_with(ProviderConfig::default);
            if let Some(value) = client_id {
                config.client_id = value;
            }
            if let Some(value) = client_secret {
                config.client_secret = value;
            }
            if let Some(value) = redirect_uri {
                config.redirect_uri = value;
            }
        }
    }
}

/// Parse configuration from TOML text
pub fn parse_config(contents: &str) -> anyhow::Result<ServiceConfig> {
    Ok(toml::from_str(contents)?)
}

/// Load configuration from a TOML file; a missing file yields defaults.
pub fn load_config(path: &str) -> anyhow::Result<ServiceConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServiceConfig::default()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to read config file {}", path))),
    }
}
