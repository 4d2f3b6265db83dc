use anyhow::{Context, Result};
use social_accounts::api::{cors_layer, create_router};
use social_accounts::config::{
    load_config, CONFIG_PATH_ENV, ENCRYPTION_KEY_ENV, STATE_SECRET_ENV,
};
use social_accounts::oauth::run_state_cleanup;
use social_gateway::{build_app_state, Secrets};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_gateway=info,social_accounts=info".into()),
        )
        .init();

    info!("Social gateway starting...");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "social-accounts.toml".to_string());
    let mut config = load_config(&config_path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());

    let secrets = Secrets {
        encryption_key: std::env::var(ENCRYPTION_KEY_ENV).with_context(|| {
            format!("{} is required (base64-encoded 32-byte key)", ENCRYPTION_KEY_ENV)
        })?,
        state_secret: std::env::var(STATE_SECRET_ENV)
            .with_context(|| format!("{} is required (at least 32 bytes)", STATE_SECRET_ENV))?,
    };

    info!(
        config_path = %config_path,
        bind_address = %config.server.bind_address,
        database_path = %config.storage.database_path,
        cors_allowed_origin = %config.server.cors_allowed_origin,
        "Configuration loaded"
    );

    let state = build_app_state(&config, &secrets)?;

    let cleanup_states = state.flow.state_manager().clone();
    let cleanup_interval = config.oauth.state_cleanup_interval_seconds.max(1);
    tokio::spawn(async move {
        run_state_cleanup(cleanup_states, cleanup_interval).await;
    });

    let router = create_router(state).layer(cors_layer(&config.server.cors_allowed_origin)?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "Social account API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Social account API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Social gateway stopped");

    Ok(())
}
