//! Concrete provider adapters.

mod facebook;
mod instagram;
mod twitter;

pub use facebook::FacebookAdapter;
pub use instagram::InstagramAdapter;
pub use twitter::TwitterAdapter;

use reqwest::Url;
use social_accounts::config::ProviderConfig;
use social_accounts::credentials::Provider;
use social_accounts::LinkError;

/// Public endpoints and scopes a provider uses when configuration omits them.
pub(crate) struct Endpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub api_base_url: &'static str,
    pub scopes: &'static [&'static str],
}

/// Validated client settings with defaults applied.
#[derive(Clone, Debug)]
pub(crate) struct ClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,
}

impl ClientSettings {
    pub fn resolve(
        provider: Provider,
        config: &ProviderConfig,
        defaults: &Endpoints,
    ) -> Result<Self, LinkError> {
        config.require_basics(provider)?;

        let pick = |configured: &Option<String>, default: &str| {
            configured
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };

        let settings = Self {
            client_id: config.client_id.trim().to_string(),
            client_secret: config.client_secret.trim().to_string(),
            redirect_uri: config.redirect_uri.trim().to_string(),
            authorize_url: pick(&config.authorize_url, defaults.authorize_url),
            token_url: pick(&config.token_url, defaults.token_url),
            api_base_url: pick(&config.api_base_url, defaults.api_base_url),
            scopes: config
                .scopes
                .clone()
                .filter(|scopes| !scopes.is_empty())
                .unwrap_or_else(|| defaults.scopes.iter().map(|s| s.to_string()).collect()),
        };

        for (name, value) in [
            ("redirect_uri", &settings.redirect_uri),
            ("authorize_url", &settings.authorize_url),
            ("token_url", &settings.token_url),
            ("api_base_url", &settings.api_base_url),
        ] {
            require_http_url(provider, name, value)?;
        }

        Ok(settings)
    }

    /// Consent URL: `{authorize_url}?client_id=…&redirect_uri=…&…`
    pub fn authorization_url(&self, scope_separator: &str, state: &str, extra: &[(&str, &str)]) -> String {
        let scope = self.scopes.join(scope_separator);
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        params.extend_from_slice(extra);

        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.authorize_url, query)
    }
}

fn require_http_url(provider: Provider, name: &str, value: &str) -> Result<(), LinkError> {
    let url = Url::parse(value).map_err(|e| {
        LinkError::Configuration(format!("{} {} '{}' is not a valid URL: {}", provider, name, value, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LinkError::Configuration(format!(
            "{} {} must use http or https, got '{}'",
            provider, name, other
        ))),
    }
}
