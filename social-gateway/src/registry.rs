//! Provider registry - resolves every configured adapter once at startup.
//!
//! A provider with no configuration section is skipped. A section that is
//! present but incomplete aborts startup.

use crate::providers::{FacebookAdapter, InstagramAdapter, TwitterAdapter};
use social_accounts::config::ServiceConfig;
use social_accounts::credentials::Provider;
use social_accounts::provider::{ProviderAdapter, ProviderRegistry};
use social_accounts::LinkError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn build_registry(config: &ServiceConfig) -> Result<ProviderRegistry, LinkError> {
    let timeout = Duration::from_secs(config.oauth.provider_timeout_seconds.max(1));
    let mut registry = ProviderRegistry::new();

    for provider in Provider::ALL {
        let Some(provider_config) = config.providers.get(provider) else {
            warn!(provider = %provider, "Provider not configured, its routes will answer 404");
            continue;
        };

        let adapter: Arc<dyn ProviderAdapter> = match provider {
            Provider::Twitter => Arc::new(TwitterAdapter::new(provider_config, timeout)?),
            Provider::Facebook => Arc::new(FacebookAdapter::new(provider_config, timeout)?),
            Provider::Instagram => Arc::new(InstagramAdapter::new(provider_config, timeout)?),
        };

        info!(provider = %provider, "Provider adapter registered");
        registry.register(adapter);
    }

    Ok(registry)
}
