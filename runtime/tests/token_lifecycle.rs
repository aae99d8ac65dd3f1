//! Integration tests for the token lifecycle manager
//!
//! Single-flight refresh, failure classification, expiry cascade, restore
//! and the authorized-request interceptor, driven through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use courier_session_core::{
    AccessToken, Clock, CredentialKey, Credentials, LifecycleEvent, OtpVerification, SessionError,
    TokenConfig,
};
use courier_session_runtime::{Attempt, TokenLifecycleManager, with_fresh_token};
use courier_session_testing::{
    InMemoryCredentialStore, ManualClock, MockAuthApi, RefreshOutcome, init_tracing,
    issue_access_token,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Test Fixtures
// ============================================================================

type Manager =
    TokenLifecycleManager<InMemoryCredentialStore, MockAuthApi<ManualClock>, ManualClock>;

struct Fixture {
    tokens: Manager,
    api: MockAuthApi<ManualClock>,
    store: InMemoryCredentialStore,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    init_tracing();
    let clock = ManualClock::default();
    let api = MockAuthApi::new(clock.clone())
        .with_user("ada@example.com", "hunter2", "courier-1")
        .with_otp("+15550100", "424242", "client-7");
    let store = InMemoryCredentialStore::new();
    let tokens = TokenLifecycleManager::new(
        store.clone(),
        api.clone(),
        clock.clone(),
        TokenConfig::default(),
    );
    Fixture {
        tokens,
        api,
        store,
        clock,
    }
}

impl Fixture {
    async fn signed_in(self) -> Self {
        self.tokens
            .sign_in(&Credentials::new("ada@example.com", "hunter2"))
            .await
            .unwrap();
        self
    }

    fn expire_access_token(&self) {
        self.clock.advance(Duration::hours(1));
    }

    fn count_expired(&self) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        self.tokens.on_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }
}

// ============================================================================
// Single-flight refresh
// ============================================================================

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let f = fixture().signed_in().await;
    f.expire_access_token();
    f.api.hold_refreshes();

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let tokens = f.tokens.clone();
            tokio::spawn(async move { tokens.ensure_valid().await })
        })
        .collect();

    f.api.wait_for_refresh_calls(1).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    f.api.release_refreshes();

    let mut issued = Vec::new();
    for caller in callers {
        issued.push(caller.await.unwrap().unwrap().access_token);
    }

    assert_eq!(f.api.refresh_calls(), 1);
    assert!(issued.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(f.tokens.is_valid());
    assert_eq!(
        f.store.value(CredentialKey::AccessToken).as_deref(),
        Some(issued[0].as_str())
    );
}

#[tokio::test]
async fn concurrent_callers_share_one_rejection() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    f.expire_access_token();
    f.api.revoke_all();

    let (a, b, c) = tokio::join!(
        f.tokens.ensure_valid(),
        f.tokens.ensure_valid(),
        f.tokens.ensure_valid()
    );

    for result in [a, b, c] {
        assert_eq!(result.unwrap_err(), SessionError::SessionExpired);
    }
    assert_eq!(f.api.refresh_calls(), 1);
    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_completes_even_if_caller_gives_up() {
    let f = fixture().signed_in().await;
    f.expire_access_token();
    f.api.hold_refreshes();

    let caller = {
        let tokens = f.tokens.clone();
        tokio::spawn(async move { tokens.ensure_valid().await })
    };
    f.api.wait_for_refresh_calls(1).await;
    caller.abort();
    f.api.release_refreshes();

    let mut events = f.tokens.subscribe_events();
    let event = events.recv().await.unwrap();
    assert!(matches!(event, LifecycleEvent::Refreshed(_)));
    assert!(f.tokens.is_valid());
    assert_eq!(f.api.refresh_calls(), 1);
}

// ============================================================================
// Failure classification
// ============================================================================

#[tokio::test]
async fn network_failure_is_not_expiry() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    let before = f.tokens.current().unwrap();
    f.expire_access_token();
    f.api.script_refresh(RefreshOutcome::Transport("connection reset".into()));

    let err = f.tokens.ensure_valid().await.unwrap_err();
    assert!(matches!(err, SessionError::Network(_)));
    assert!(err.is_retryable());

    assert_eq!(f.tokens.current().unwrap(), before);
    assert_eq!(
        f.store.value(CredentialKey::RefreshToken).as_deref(),
        Some(before.refresh_token.as_str())
    );
    assert_eq!(expired.load(Ordering::SeqCst), 0);

    // The same refresh token is still good for the retry.
    let session = f.tokens.ensure_valid().await.unwrap();
    assert_ne!(session.access_token, before.access_token);
    assert_eq!(f.api.refresh_calls(), 2);
}

#[tokio::test]
async fn rejected_refresh_token_clears_everything() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    let mut events = f.tokens.subscribe_events();
    f.expire_access_token();
    f.api.script_refresh(RefreshOutcome::Reject);

    assert_eq!(
        f.tokens.ensure_valid().await,
        Err(SessionError::SessionExpired)
    );

    assert!(f.tokens.current().is_none());
    assert!(f.store.is_empty());
    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Expired);

    // Subsequent calls are "no session", not a second expiry.
    assert_eq!(f.tokens.ensure_valid().await, Err(SessionError::NotSignedIn));
    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_notifies_listeners_with_new_token() {
    let f = fixture().signed_in().await;
    let seen: Arc<Mutex<Vec<AccessToken>>> = Arc::default();
    let sink = Arc::clone(&seen);
    f.tokens.on_refreshed(move |token| sink.lock().unwrap().push(token.clone()));
    f.expire_access_token();

    let session = f.tokens.ensure_valid().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![session.access_token.clone()]);
    assert_eq!(session.user_id().as_str(), "courier-1");
}

// ============================================================================
// Sign-out
// ============================================================================

#[tokio::test]
async fn sign_out_is_idempotent() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    let mut events = f.tokens.subscribe_events();

    f.tokens.sign_out(false).await.unwrap();
    f.tokens.sign_out(false).await.unwrap();

    assert!(f.tokens.current().is_none());
    assert!(f.store.is_empty());
    assert_eq!(expired.load(Ordering::SeqCst), 0);
    assert_eq!(events.recv().await.unwrap(), LifecycleEvent::SignedOut);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn expired_sign_out_fires_once() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();

    f.tokens.sign_out(true).await.unwrap();
    f.tokens.sign_out(true).await.unwrap();

    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sign_out_during_refresh_wins() {
    let f = fixture().signed_in().await;
    f.expire_access_token();
    f.api.hold_refreshes();

    let caller = {
        let tokens = f.tokens.clone();
        tokio::spawn(async move { tokens.ensure_valid().await })
    };
    f.api.wait_for_refresh_calls(1).await;
    f.tokens.sign_out(false).await.unwrap();
    f.api.release_refreshes();

    assert_eq!(caller.await.unwrap(), Err(SessionError::NotSignedIn));
    assert!(f.tokens.current().is_none());
    assert!(f.store.is_empty());
}

// ============================================================================
// Sign-in variants and restore
// ============================================================================

#[tokio::test]
async fn otp_verification_creates_session() {
    let f = fixture();

    let rejected = f
        .tokens
        .verify_otp(&OtpVerification::new("+15550100", "000000"))
        .await;
    assert_eq!(rejected.unwrap_err(), SessionError::InvalidCredentials);
    assert!(!f.tokens.has_session());

    let session = f
        .tokens
        .verify_otp(&OtpVerification::new("+15550100", "424242"))
        .await
        .unwrap();
    assert_eq!(session.user_id().as_str(), "client-7");
    assert!(f.tokens.is_valid());
    assert!(f.store.value(CredentialKey::RefreshToken).is_some());
}

#[tokio::test]
async fn restore_picks_up_stale_session_and_refreshes_it() {
    let f = fixture();
    let stale = issue_access_token("courier-1", f.clock.now() - Duration::minutes(5));
    let refresh = f.api.mint_refresh_token("courier-1");
    let seeded = InMemoryCredentialStore::with_entries(&[
        (CredentialKey::AccessToken, stale.as_str()),
        (CredentialKey::RefreshToken, refresh.as_str()),
        (CredentialKey::User, r#"{"id":"courier-1","name":"Ada","role":"courier"}"#),
    ]);
    let tokens = TokenLifecycleManager::new(
        seeded.clone(),
        f.api.clone(),
        f.clock.clone(),
        TokenConfig::default(),
    );

    let restored = tokens.restore().await.unwrap().unwrap();
    assert_eq!(restored.user.name.as_deref(), Some("Ada"));
    assert!(!tokens.is_valid());

    let session = tokens.ensure_valid().await.unwrap();
    assert!(tokens.is_valid());
    assert_eq!(session.user.name.as_deref(), Some("Ada"));
    assert_eq!(
        seeded.value(CredentialKey::AccessToken).as_deref(),
        Some(session.access_token.as_str())
    );
}

#[tokio::test]
async fn restore_discards_unusable_entries() {
    let f = fixture();

    let partial = InMemoryCredentialStore::with_entries(&[(CredentialKey::AccessToken, "a.b.c")]);
    let tokens = TokenLifecycleManager::new(
        partial.clone(),
        f.api.clone(),
        f.clock.clone(),
        TokenConfig::default(),
    );
    assert!(tokens.restore().await.unwrap().is_none());
    assert!(partial.is_empty());

    let garbage = InMemoryCredentialStore::with_entries(&[
        (CredentialKey::AccessToken, "not-a-jwt"),
        (CredentialKey::RefreshToken, "r"),
    ]);
    let tokens = TokenLifecycleManager::new(
        garbage.clone(),
        f.api.clone(),
        f.clock.clone(),
        TokenConfig::default(),
    );
    assert!(tokens.restore().await.unwrap().is_none());
    assert!(garbage.is_empty());
    assert!(!tokens.has_session());
}

#[tokio::test]
async fn restore_with_empty_store_is_none() {
    let f = fixture();
    assert!(f.tokens.restore().await.unwrap().is_none());
}

// ============================================================================
// Authorized requests
// ============================================================================

/// Resource that rejects the first `rejections` calls.
fn resource(
    rejections: usize,
) -> (
    Arc<Mutex<Vec<AccessToken>>>,
    impl FnMut(AccessToken) -> std::future::Ready<Attempt<&'static str>>,
) {
    let seen: Arc<Mutex<Vec<AccessToken>>> = Arc::default();
    let log = Arc::clone(&seen);
    let op = move |token: AccessToken| {
        let mut log = log.lock().unwrap();
        log.push(token);
        std::future::ready(if log.len() > rejections {
            Attempt::Done("ok")
        } else {
            Attempt::Unauthorized
        })
    };
    (seen, op)
}

#[tokio::test]
async fn interceptor_passes_through_accepted_token() {
    let f = fixture().signed_in().await;
    let (seen, op) = resource(0);

    assert_eq!(with_fresh_token(&f.tokens, op).await, Ok("ok"));
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(f.api.refresh_calls(), 0);
}

#[tokio::test]
async fn interceptor_refreshes_and_retries_once() {
    let f = fixture().signed_in().await;
    let (seen, op) = resource(1);

    assert_eq!(with_fresh_token(&f.tokens, op).await, Ok("ok"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
    assert_eq!(f.api.refresh_calls(), 1);
    assert_eq!(f.tokens.current().unwrap().access_token, seen[1]);
}

#[tokio::test]
async fn interceptor_gives_up_after_second_rejection() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    let (seen, op) = resource(usize::MAX);

    assert_eq!(
        with_fresh_token(&f.tokens, op).await,
        Err(SessionError::Unauthorized)
    );
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(f.tokens.has_session());
    assert_eq!(expired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn interceptor_surfaces_expiry() {
    let f = fixture().signed_in().await;
    let expired = f.count_expired();
    f.api.revoke_all();
    let (_seen, op) = resource(1);

    assert_eq!(
        with_fresh_token(&f.tokens, op).await,
        Err(SessionError::SessionExpired)
    );
    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert!(f.store.is_empty());
}
