//! Unit tests for freshness classification and refresh write-back

use super::*;
use crate::credentials::{NewCredential, TokenSet};
use crate::provider::{ExchangeResult, ProviderAdapter, RefreshResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

fn credential(
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    status: AccountStatus,
) -> Credential {
    let now = Utc::now();
    Credential {
        id: Uuid::now_v7(),
        owner_user_id: "u1".to_string(),
        provider: Provider::Twitter,
        provider_account_id: "p1".to_string(),
        display_name: "alice".to_string(),
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        access_token_expires_at: expires_at,
        status,
        last_error: None,
        last_synced_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn hour() -> Duration {
    Duration::hours(1)
}

#[test]
fn test_expired_with_refresh_token_needs_refresh() {
    let now = Utc::now();
    let c = credential("a", Some("r"), Some(now - Duration::seconds(1)), AccountStatus::Active);
    assert_eq!(classify(&c, now, hour()), Freshness::NeedsRefresh);
}

#[test]
fn test_no_expiry_no_refresh_token_is_unusable() {
    let now = Utc::now();
    let c = credential("a", None, None, AccountStatus::Active);
    assert!(matches!(classify(&c, now, hour()), Freshness::Unusable(_)));
}

#[test]
fn test_far_expiry_is_usable() {
    let now = Utc::now();
    let c = credential("a", Some("r"), Some(now + Duration::hours(2)), AccountStatus::Active);
    assert_eq!(classify(&c, now, hour()), Freshness::Usable);

    let without_refresh = credential("a", None, Some(now + Duration::hours(2)), AccountStatus::Active);
    assert_eq!(classify(&without_refresh, now, hour()), Freshness::Usable);
}

#[test]
fn test_within_skew_window() {
    let now = Utc::now();
    let soon = now + Duration::minutes(30);

    let refreshable = credential("a", Some("r"), Some(soon), AccountStatus::Active);
    assert_eq!(classify(&refreshable, now, hour()), Freshness::NeedsRefresh);

    // Nothing to refresh with, but it still works for half an hour.
    let not_refreshable = credential("a", None, Some(soon), AccountStatus::Active);
    assert_eq!(classify(&not_refreshable, now, hour()), Freshness::Usable);
}

#[test]
fn test_no_expiry_with_refresh_token_needs_refresh() {
    let now = Utc::now();
    let c = credential("a", Some("r"), None, AccountStatus::Active);
    assert_eq!(classify(&c, now, hour()), Freshness::NeedsRefresh);
}

#[test]
fn test_expired_without_refresh_token_is_unusable() {
    let now = Utc::now();
    let c = credential("a", None, Some(now - Duration::seconds(1)), AccountStatus::Active);
    assert!(matches!(classify(&c, now, hour()), Freshness::Unusable(_)));
}

#[test]
fn test_empty_access_token() {
    let now = Utc::now();
    let later = Some(now + Duration::hours(5));
    assert_eq!(
        classify(&credential("", Some("r"), later, AccountStatus::Active), now, hour()),
        Freshness::NeedsRefresh
    );
    assert!(matches!(
        classify(&credential("", None, later, AccountStatus::Active), now, hour()),
        Freshness::Unusable(_)
    ));
}

#[test]
fn test_inactive_statuses_are_unusable() {
    let now = Utc::now();
    for status in [AccountStatus::Revoked, AccountStatus::Error, AccountStatus::Inactive] {
        let c = credential("a", Some("r"), Some(now + Duration::hours(5)), status);
        assert!(matches!(classify(&c, now, hour()), Freshness::Unusable(_)));
    }
}

#[test]
fn test_custom_skew() {
    let now = Utc::now();
    let c = credential("a", Some("r"), Some(now + Duration::minutes(10)), AccountStatus::Active);
    assert_eq!(classify(&c, now, Duration::minutes(5)), Freshness::Usable);
    assert_eq!(classify(&c, now, Duration::minutes(15)), Freshness::NeedsRefresh);
}

// --- ensure_fresh ---

/// Adapter whose refresh outcome is scripted per test.
struct ScriptedAdapter {
    refresh_calls: AtomicUsize,
    outcome: StdMutex<Result<RefreshResult, ProviderAuthError>>,
    delay: std::time::Duration,
}

impl ScriptedAdapter {
    fn new(outcome: Result<RefreshResult, ProviderAuthError>) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            outcome: StdMutex::new(outcome),
            delay: std::time::Duration::ZERO,
        })
    }

    fn slow(outcome: Result<RefreshResult, ProviderAuthError>, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            outcome: StdMutex::new(outcome),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn identifier(&self) -> Provider {
        Provider::Twitter
    }

    fn build_authorization_url(&self, state: &str) -> String {
        format!("https://twitter.example/authorize?state={}", state)
    }

    async fn exchange_code(&self, _code: &str) -> Result<ExchangeResult, ProviderAuthError> {
        Err(ProviderAuthError::rejected(Provider::Twitter, "unused"))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResult, ProviderAuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.lock().unwrap().clone()
    }
}

fn store() -> Arc<CredentialStore> {
    Arc::new(CredentialStore::new(":memory:", &BASE64.encode([9u8; 32])).unwrap())
}

fn seed(store: &CredentialStore, refresh: Option<&str>, expires_at: Option<DateTime<Utc>>) -> Credential {
    store
        .upsert(&NewCredential {
            owner_user_id: "u1".to_string(),
            provider: Provider::Twitter,
            provider_account_id: "p1".to_string(),
            display_name: "alice".to_string(),
            tokens: TokenSet {
                access_token: "old-access".to_string(),
                refresh_token: refresh.map(str::to_string),
                expires_at,
            },
        })
        .unwrap()
}

fn new_tokens() -> Result<RefreshResult, ProviderAuthError> {
    Ok(RefreshResult {
        access_token: "new-access".to_string(),
        refresh_token: Some("new-refresh".to_string()),
        expires_in_seconds: Some(7200),
    })
}

fn guard(store: &Arc<CredentialStore>, adapter: Arc<ScriptedAdapter>) -> FreshnessGuard {
    FreshnessGuard::new(Arc::clone(store), ProviderRegistry::new().with(adapter))
}

#[tokio::test]
async fn test_usable_credential_untouched() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() + Duration::hours(3)));
    let adapter = ScriptedAdapter::new(new_tokens());
    let guard = guard(&store, Arc::clone(&adapter));

    let result = guard.ensure_fresh(seeded.clone()).await.unwrap();

    assert_eq!(result.access_token, "old-access");
    assert_eq!(adapter.calls(), 0);
    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.updated_at, seeded.updated_at);
}

#[tokio::test]
async fn test_refresh_success_persists() {
    let store = store();
    let seeded = seed(&store, Some("old-refresh"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(new_tokens());
    let guard = guard(&store, Arc::clone(&adapter));

    let result = guard.ensure_fresh(seeded.clone()).await.unwrap();

    assert_eq!(adapter.calls(), 1);
    assert_eq!(result.access_token, "new-access");
    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.access_token, "new-access");
    assert_eq!(stored.refresh_token.as_deref(), Some("new-refresh"));
    assert_eq!(stored.status, AccountStatus::Active);
    assert!(stored.access_token_expires_at.unwrap() > Utc::now() + Duration::hours(1));
}

#[tokio::test]
async fn test_rejected_refresh_marks_error() {
    let store = store();
    let seeded = seed(&store, Some("dead"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Err(ProviderAuthError::rejected(
        Provider::Twitter,
        "invalid_grant",
    )));
    let guard = guard(&store, Arc::clone(&adapter));

    let err = guard.ensure_fresh(seeded.clone()).await.unwrap_err();
    assert!(matches!(err, LinkError::CredentialUnusable { .. }));

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
    assert!(stored.last_error.as_ref().unwrap().contains("invalid_grant"));
    assert_eq!(stored.access_token, "old-access");

    // Now unusable: no further provider calls.
    let err = guard.ensure_fresh(stored).await.unwrap_err();
    assert!(matches!(err, LinkError::CredentialUnusable { .. }));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_leaves_store_alone() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Err(ProviderAuthError::transient(
        Provider::Twitter,
        "503 Service Unavailable",
    )));
    let guard = guard(&store, Arc::clone(&adapter));

    let err = guard.ensure_fresh(seeded.clone()).await.unwrap_err();
    assert!(matches!(err, LinkError::ProviderAuth(_)));

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(stored.updated_at, seeded.updated_at);
}

#[tokio::test]
async fn test_repeated_transient_failures_mark_error() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Err(ProviderAuthError::transient(
        Provider::Twitter,
        "connection reset",
    )));
    let guard = guard(&store, Arc::clone(&adapter)).with_max_transient_failures(2);

    assert!(matches!(
        guard.ensure_fresh(seeded.clone()).await,
        Err(LinkError::ProviderAuth(_))
    ));
    assert!(matches!(
        guard.ensure_fresh(seeded.clone()).await,
        Err(LinkError::CredentialUnusable { .. })
    ));

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_refresh_timeout_is_transient() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::slow(new_tokens(), std::time::Duration::from_millis(500));
    let guard = guard(&store, Arc::clone(&adapter))
        .with_provider_timeout(std::time::Duration::from_millis(50));

    let err = guard.ensure_fresh(seeded.clone()).await.unwrap_err();
    match err {
        LinkError::ProviderAuth(e) => assert!(e.message.contains("timed out")),
        other => panic!("expected transient provider error, got {:?}", other),
    }

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.access_token, "old-access");
    assert_eq!(stored.status, AccountStatus::Active);
}

#[tokio::test]
async fn test_unusable_active_credential_flipped_to_error() {
    let store = store();
    let seeded = seed(&store, None, None);
    let adapter = ScriptedAdapter::new(new_tokens());
    let guard = guard(&store, Arc::clone(&adapter));

    let err = guard.ensure_fresh(seeded.clone()).await.unwrap_err();
    assert!(matches!(err, LinkError::CredentialUnusable { .. }));
    assert_eq!(adapter.calls(), 0);

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
    assert!(stored.last_error.is_some());
}

#[tokio::test]
async fn test_concurrent_refresh_single_flight() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::slow(new_tokens(), std::time::Duration::from_millis(100));
    let guard = guard(&store, Arc::clone(&adapter));

    let results = futures::future::join_all(
        (0..5).map(|_| guard.ensure_fresh(seeded.clone())),
    )
    .await;

    assert_eq!(adapter.calls(), 1);
    for result in results {
        assert_eq!(result.unwrap().access_token, "new-access");
    }
    assert!(guard.in_flight.is_empty());
}

#[tokio::test]
async fn test_ensure_fresh_for_missing_account() {
    let store = store();
    let adapter = ScriptedAdapter::new(new_tokens());
    let guard = guard(&store, adapter);

    let err = guard
        .ensure_fresh_for("u1", Provider::Twitter)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::NotFound));
}

#[tokio::test]
async fn test_refresh_without_registered_adapter() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let guard = FreshnessGuard::new(Arc::clone(&store), ProviderRegistry::new());

    let err = guard.ensure_fresh(seeded).await.unwrap_err();
    assert!(matches!(err, LinkError::ProviderNotConfigured(Provider::Twitter)));
}

#[tokio::test]
async fn test_stale_unusable_snapshot_keeps_relinked_credential() {
    let store = store();
    let stale = seed(&store, None, Some(Utc::now() - Duration::seconds(1)));
    let relinked = store
        .upsert(&NewCredential {
            owner_user_id: "u1".to_string(),
            provider: Provider::Twitter,
            provider_account_id: "p1".to_string(),
            display_name: "alice".to_string(),
            tokens: TokenSet {
                access_token: "relinked-access".to_string(),
                refresh_token: Some("relinked-refresh".to_string()),
                expires_at: Some(Utc::now() + Duration::hours(3)),
            },
        })
        .unwrap();
    assert_eq!(relinked.id, stale.id);
    let adapter = ScriptedAdapter::new(new_tokens());
    let guard = guard(&store, Arc::clone(&adapter));

    let result = guard.ensure_fresh(stale.clone()).await.unwrap();

    assert_eq!(result.access_token, "relinked-access");
    assert_eq!(adapter.calls(), 0);
    let stored = store.find_by_id(stale.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn test_refresh_with_out_of_range_expiry_is_malformed() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Ok(RefreshResult {
        access_token: "new-access".to_string(),
        refresh_token: None,
        expires_in_seconds: Some(9_000_000_000_000),
    }));
    let guard = guard(&store, Arc::clone(&adapter));

    let err = guard.ensure_fresh(seeded.clone()).await.unwrap_err();
    match err {
        LinkError::ProviderAuth(e) => {
            assert_eq!(e.kind, crate::provider::ProviderErrorKind::Malformed)
        }
        other => panic!("expected malformed provider error, got {:?}", other),
    }

    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.access_token, "old-access");
    assert_eq!(stored.updated_at, seeded.updated_at);
}

#[tokio::test]
async fn test_clear_failures_restarts_transient_count() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Err(ProviderAuthError::transient(
        Provider::Twitter,
        "connection reset",
    )));
    let guard = guard(&store, Arc::clone(&adapter)).with_max_transient_failures(2);

    assert!(matches!(
        guard.ensure_fresh(seeded.clone()).await,
        Err(LinkError::ProviderAuth(_))
    ));
    guard.clear_failures(seeded.id);
    assert!(guard.transient_failures.is_empty());

    assert!(matches!(
        guard.ensure_fresh(seeded.clone()).await,
        Err(LinkError::ProviderAuth(_))
    ));
    let stored = store.find_by_id(seeded.id).unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
}

#[tokio::test]
async fn test_missing_account_drops_failure_count() {
    let store = store();
    let seeded = seed(&store, Some("r"), Some(Utc::now() - Duration::seconds(1)));
    let adapter = ScriptedAdapter::new(Err(ProviderAuthError::transient(
        Provider::Twitter,
        "connection reset",
    )));
    let guard = guard(&store, Arc::clone(&adapter));

    assert!(guard.ensure_fresh(seeded.clone()).await.is_err());
    assert_eq!(guard.transient_failures.len(), 1);

    assert_eq!(store.delete_by_owner_and_id("u1", seeded.id).unwrap(), 1);
    let err = guard.ensure_fresh(seeded).await.unwrap_err();
    assert!(matches!(err, LinkError::NotFound));
    assert!(guard.transient_failures.is_empty());
}
