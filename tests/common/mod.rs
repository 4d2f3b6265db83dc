// Shared fixtures for the social account API integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use social_accounts::accounts::AccountDirectory;
use social_accounts::api::{create_router, AppState};
use social_accounts::auth::StaticTokenResolver;
use social_accounts::credentials::{CredentialStore, Provider};
use social_accounts::freshness::FreshnessGuard;
use social_accounts::oauth::{AuthorizationFlow, StateManager};
use social_accounts::provider::{
    ExchangeResult, ProviderAdapter, ProviderAuthError, ProviderRegistry, RefreshResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const TOKEN_U1: &str = "token-u1";
pub const TOKEN_U2: &str = "token-u2";

/// Adapter double that records every call and answers with scripted outcomes.
pub struct SpyAdapter {
    provider: Provider,
    exchange_outcome: Mutex<Result<ExchangeResult, ProviderAuthError>>,
    refresh_outcome: Mutex<Result<RefreshResult, ProviderAuthError>>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    last_code: Mutex<Option<String>>,
}

impl SpyAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            exchange_outcome: Mutex::new(Ok(exchange_result("a1", "p1", "alice"))),
            refresh_outcome: Mutex::new(Ok(RefreshResult {
                access_token: "a2".to_string(),
                refresh_token: None,
                expires_in_seconds: Some(7200),
            })),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_code: Mutex::new(None),
        }
    }

    pub fn exchange_returns(&self, outcome: Result<ExchangeResult, ProviderAuthError>) {
        *self.exchange_outcome.lock().unwrap() = outcome;
    }

    pub fn refresh_returns(&self, outcome: Result<RefreshResult, ProviderAuthError>) {
        *self.refresh_outcome.lock().unwrap() = outcome;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for SpyAdapter {
    fn identifier(&self) -> Provider {
        self.provider
    }

    fn build_authorization_url(&self, state: &str) -> String {
        format!(
            "https://{}.example/authorize?response_type=code&client_id=test&state={}",
            self.provider, state
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<ExchangeResult, ProviderAuthError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(code.to_string());
        self.exchange_outcome.lock().unwrap().clone()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_outcome.lock().unwrap().clone()
    }
}

pub fn exchange_result(access_token: &str, account_id: &str, display_name: &str) -> ExchangeResult {
    ExchangeResult {
        access_token: access_token.to_string(),
        refresh_token: Some("r1".to_string()),
        expires_in_seconds: Some(3600),
        provider_account_id: account_id.to_string(),
        display_name: display_name.to_string(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<CredentialStore>,
    pub guard: FreshnessGuard,
    pub twitter: Arc<SpyAdapter>,
    pub facebook: Arc<SpyAdapter>,
}

/// Router over an in-memory store with Twitter and Facebook spies
/// registered. Instagram is left unconfigured.
pub fn test_app() -> TestApp {
    let store = Arc::new(CredentialStore::new(":memory:", &BASE64.encode([7u8; 32])).unwrap());
    let twitter = Arc::new(SpyAdapter::new(Provider::Twitter));
    let facebook = Arc::new(SpyAdapter::new(Provider::Facebook));

    let registry = ProviderRegistry::new()
        .with(Arc::clone(&twitter) as Arc<dyn ProviderAdapter>)
        .with(Arc::clone(&facebook) as Arc<dyn ProviderAdapter>);
    let states = StateManager::new(b"integration-test-state-secret-0123456789", 600).unwrap();
    let identity = StaticTokenResolver::default()
        .with_token(TOKEN_U1, "u1")
        .with_token(TOKEN_U2, "u2");

    let guard = FreshnessGuard::new(Arc::clone(&store), registry.clone());
    let router = create_router(AppState {
        flow: AuthorizationFlow::new(registry, Arc::clone(&store), states),
        guard: guard.clone(),
        accounts: AccountDirectory::new(Arc::clone(&store)),
        identity: Arc::new(identity),
    });

    TestApp {
        router,
        store,
        guard,
        twitter,
        facebook,
    }
}

/// Sends a request and returns the status plus the JSON body (Null when empty).
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

/// Runs `/auth` for the caller and returns the issued state.
pub async fn issue_state(app: &TestApp, provider: &str, token: &str) -> String {
    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/social-accounts/{}/auth", provider),
        Some(token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "auth failed: {}", body);
    body["state"].as_str().unwrap().to_string()
}

/// Full link: `/auth` then `/callback` with `code`, as the same caller.
pub async fn link(
    app: &TestApp,
    provider: &str,
    token: &str,
    code: &str,
) -> (StatusCode, serde_json::Value) {
    let state = issue_state(app, provider, token).await;
    send(
        &app.router,
        "POST",
        &format!("/social-accounts/{}/callback?code={}&state={}", provider, code, state),
        Some(token),
    )
    .await
}
