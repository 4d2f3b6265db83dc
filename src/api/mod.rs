//! HTTP surface for linking and managing social accounts.
//!
//! Every `/social-accounts` route requires `Authorization: Bearer <token>`;
//! the token is resolved to the caller's user id and every operation is
//! scoped to that user.
//!
//! The second path segment is either a provider name or an account id
//! depending on the method: `GET /social-accounts/twitter` lists Twitter
//! links, `DELETE /social-accounts/{id}` unlinks one account.

mod error;

pub use error::ApiError;

use crate::accounts::AccountDirectory;
use crate::auth::{authenticate, IdentityResolver};
use crate::credentials::{AccountView, Provider};
use crate::error::LinkError;
use crate::freshness::FreshnessGuard;
use crate::oauth::{AuthorizationFlow, AuthorizationStart};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};
use uuid::Uuid;


/// Shared application state for the social account API
#[derive(Clone)]
pub struct AppState {
    pub flow: AuthorizationFlow,
    pub guard: FreshnessGuard,
    pub accounts: AccountDirectory,
    pub identity: Arc<dyn IdentityResolver>,
}

/// Callback query parameters, as the provider appends them to the redirect
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct RemoveAccountResponse {
    pub removed: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Create the social account router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/social-accounts", get(list_accounts))
        .route(
            "/social-accounts/:key",
            get(list_provider_accounts).delete(remove_account),
        )
        .route("/social-accounts/:key/auth", get(start_authorization))
        .route(
            "/social-accounts/:key/callback",
            get(complete_authorization).post(complete_authorization),
        )
        .route("/social-accounts/:key/refresh", post(refresh_account))
        .with_state(Arc::new(state))
}

/// CORS policy allowing the dashboard origin to call the API
pub fn cors_layer(allowed_origin: &str) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = allowed_origin
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid CORS origin '{}'", allowed_origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(true))
}

fn parse_provider(segment: &str) -> Result<Provider, ApiError> {
    segment
        .parse()
        .map_err(|_| ApiError::UnknownProvider(segment.to_string()))
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /social-accounts - All of the caller's linked accounts
async fn list_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccountView>>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    Ok(Json(state.accounts.list_accounts(&owner, None)?))
}

/// GET /social-accounts/:provider - The caller's accounts on one provider
async fn list_provider_accounts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<Vec<AccountView>>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    let provider = parse_provider(&key)?;
    Ok(Json(state.accounts.list_accounts(&owner, Some(provider))?))
}

/// DELETE /social-accounts/:id - Unlink one of the caller's accounts
///
/// Unknown ids, malformed ids and accounts owned by someone else all
/// answer 404.
async fn remove_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<RemoveAccountResponse>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    let account_id = Uuid::parse_str(&key).map_err(|_| {
        debug!(key = %key, "Unlink requested with a malformed account id");
        LinkError::NotFound
    })?;

    let removed = state.accounts.remove_account(&owner, account_id)?;
    if removed == 0 {
        return Err(LinkError::NotFound.into());
    }
    state.guard.clear_failures(account_id);

    Ok(Json(RemoveAccountResponse { removed }))
}

/// GET /social-accounts/:provider/auth - Authorization URL and state
async fn start_authorization(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<AuthorizationStart>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    let provider = parse_provider(&key)?;
    Ok(Json(state.flow.start_authorization(provider, &owner)?))
}

/// GET|POST /social-accounts/:provider/callback?code=&state=
///
/// Completes the link and returns the persisted account without secrets.
async fn complete_authorization(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AccountView>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    let provider = parse_provider(&key)?;

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "no description".to_string());
        warn!(
            provider = %provider,
            owner = %owner,
            error = %error,
            description = %description,
            "Provider reported an authorization error"
        );
        return Err(LinkError::InvalidRequest(format!(
            "authorization was not granted: {} - {}",
            error, description
        ))
        .into());
    }

    let code = params.code.unwrap_or_default();
    let csrf_state = params.state.unwrap_or_default();

    let account = state
        .flow
        .complete_authorization(provider, &code, &csrf_state, &owner)
        .await?;
    state.guard.clear_failures(account.id);

    Ok(Json(account))
}

/// POST /social-accounts/:provider/refresh - Make the caller's token fresh
async fn refresh_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    let owner = authenticate(&headers, state.identity.as_ref())?;
    let provider = parse_provider(&key)?;

    let credential = state.guard.ensure_fresh_for(&owner, provider).await?;
    Ok(Json(credential.to_view()))
}
