//! Token lifecycle manager.
//!
//! Owns the one [`Session`] of the process, persists it through the
//! [`CredentialStore`] and keeps it fresh through the [`AuthApi`].
//!
//! # Single-flight refresh
//!
//! Every caller of [`TokenLifecycleManager::ensure_valid`] that finds the
//! access token stale attaches to the same pending refresh. The exchange runs
//! on its own task, so it completes (and its outcome is applied) even if
//! every caller gives up waiting. Refresh tokens are single-use on the
//! server; a second concurrent exchange would revoke the first.
//!
//! ```text
//!  ensure_valid() ─┐
//!  ensure_valid() ─┼──> pending: Shared<refresh task> ──> AuthApi::refresh (once)
//!  ensure_valid() ─┘                     │
//!                                        ├─ Ok        → memory, store, on_refreshed
//!                                        ├─ Rejected  → memory, store cleared, on_expired
//!                                        └─ Transport → session untouched, retryable
//! ```
//!
//! # Generations
//!
//! Each installed session gets a new generation number. A refresh outcome is
//! only applied if the generation it started from is still current, so a
//! sign-out or a new sign-in during a refresh is never overwritten.

use courier_session_core::environment::Clock;
use courier_session_core::error::{AuthApiError, SessionError, StoreError};
use courier_session_core::events::LifecycleEvent;
use courier_session_core::providers::{AuthApi, CredentialKey, CredentialStore};
use courier_session_core::session::{Credentials, OtpVerification, Session, TokenGrant, User, UserId};
use courier_session_core::token::{AccessToken, RefreshToken};
use courier_session_core::TokenConfig;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

use crate::metrics::SessionMetrics;

/// Capacity of the lifecycle event broadcast channel.
const EVENT_CAPACITY: usize = 64;

type RefreshOutcome = Result<Session, SessionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;
type SessionEndedCallback = Arc<dyn Fn() + Send + Sync>;
type RefreshedCallback = Arc<dyn Fn(&AccessToken) + Send + Sync>;

/// Handle for removing a lifecycle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What the realtime supervisor needs from the token manager.
///
/// Kept narrow so the supervisor can be driven by a stub in tests.
pub trait TokenSource: Send + Sync + 'static {
    /// `true` if a session exists, fresh or stale.
    fn has_session(&self) -> bool;

    /// A session with a fresh access token, refreshing if needed.
    ///
    /// # Errors
    ///
    /// See [`TokenLifecycleManager::ensure_valid`].
    fn ensure_valid(&self) -> impl Future<Output = Result<Session, SessionError>> + Send;
}

struct PendingRefresh {
    generation: u64,
    outcome: SharedRefresh,
}

#[derive(Default)]
struct TokenState {
    session: Option<Session>,
    /// Bumped whenever the session is installed or cleared.
    generation: u64,
    /// The server rejected the current access token before its `exp`.
    stale: bool,
    pending: Option<PendingRefresh>,
}

#[derive(Default)]
struct Listeners {
    expired: Vec<(ListenerId, SessionEndedCallback)>,
    signed_out: Vec<(ListenerId, SessionEndedCallback)>,
    refreshed: Vec<(ListenerId, RefreshedCallback)>,
}

impl Listeners {
    fn len(&self) -> usize {
        self.expired.len() + self.signed_out.len() + self.refreshed.len()
    }
}

struct Inner<S, A, C> {
    store: S,
    api: A,
    clock: C,
    config: TokenConfig,
    state: Mutex<TokenState>,
    listeners: Mutex<Listeners>,
    next_listener: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Owns the session and its token pair.
///
/// Cheap to clone; clones share the same session.
///
/// # Type Parameters
///
/// - `S`: Credential store
/// - `A`: Auth endpoints
/// - `C`: Clock used for every validity check
pub struct TokenLifecycleManager<S, A, C> {
    inner: Arc<Inner<S, A, C>>,
}

impl<S, A, C> Clone for TokenLifecycleManager<S, A, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S, A, C> TokenLifecycleManager<S, A, C>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
{
    /// Create a manager with no session. Call [`restore`](Self::restore) to
    /// pick up a persisted one.
    #[must_use]
    pub fn new(store: S, api: A, clock: C, config: TokenConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                clock,
                config,
                state: Mutex::new(TokenState::default()),
                listeners: Mutex::new(Listeners::default()),
                next_listener: AtomicU64::new(1),
                events,
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validity
    // ═══════════════════════════════════════════════════════════════════════

    /// `true` iff a session exists and its access token expires strictly
    /// after now. A token the server has rejected counts as invalid.
    ///
    /// No I/O, no mutation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let now = self.inner.clock.now();
        let state = lock(&self.inner.state);
        state
            .session
            .as_ref()
            .is_some_and(|session| !state.stale && session.is_fresh_at(now))
    }

    /// `true` if a session exists, fresh or stale.
    #[must_use]
    pub fn has_session(&self) -> bool {
        lock(&self.inner.state).session.is_some()
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        lock(&self.inner.state).session.clone()
    }

    /// Return a session with a fresh access token, refreshing if needed.
    ///
    /// Concurrent callers share a single refresh and all observe its outcome.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotSignedIn`] if there is no session
    /// - [`SessionError::SessionExpired`] if the refresh token was rejected;
    ///   the session and the credential store have been cleared
    /// - [`SessionError::Network`] if the exchange failed in transit; the
    ///   session is untouched and a later call retries
    /// - [`SessionError::MalformedToken`] if the server issued an unreadable
    ///   access token; the session is untouched
    pub async fn ensure_valid(&self) -> Result<Session, SessionError> {
        let refresh = {
            let now = self.inner.clock.now();
            let leeway = chrono::Duration::from_std(self.inner.config.refresh_leeway)
                .unwrap_or_else(|_| chrono::Duration::zero());

            let mut state = lock(&self.inner.state);
            let Some(session) = state.session.as_ref() else {
                return Err(SessionError::NotSignedIn);
            };

            if !state.stale && session.is_fresh_at(now + leeway) {
                return Ok(session.clone());
            }

            if let Some(pending) = &state.pending {
                tracing::debug!(generation = pending.generation, "Joining in-flight refresh");
                pending.outcome.clone()
            } else {
                let generation = state.generation;
                let refresh_token = session.refresh_token.clone();
                let user = session.user.clone();
                let outcome = self.spawn_refresh(generation, refresh_token, user);
                state.pending = Some(PendingRefresh {
                    generation,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        refresh.await
    }

    /// Mark `rejected` as stale if it is still the current access token.
    ///
    /// Used when a resource answered 401 although the local clock considers
    /// the token valid. Returns `true` if the session was marked; `false` if
    /// there is no session or a newer token is already in place.
    pub fn invalidate(&self, rejected: &AccessToken) -> bool {
        let mut state = lock(&self.inner.state);
        let current = state
            .session
            .as_ref()
            .is_some_and(|session| session.access_token == *rejected);
        if current {
            tracing::debug!("Access token rejected by server, marked stale");
            state.stale = true;
        }
        current
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session creation
    // ═══════════════════════════════════════════════════════════════════════

    /// Exchange credentials for a new session.
    ///
    /// Replaces any existing session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidCredentials`] if the credentials were rejected
    /// - [`SessionError::Network`] on transport failure
    /// - [`SessionError::MalformedToken`] if the issued token is unreadable
    /// - [`SessionError::Storage`] if the session could not be persisted; it
    ///   is still installed in memory
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, SessionError> {
        let grant = self.inner.api.sign_in(credentials).await?;
        self.install_grant(grant).await
    }

    /// Exchange a one-time password for a new session.
    ///
    /// # Errors
    ///
    /// Same as [`sign_in`](Self::sign_in).
    pub async fn verify_otp(&self, verification: &OtpVerification) -> Result<Session, SessionError> {
        let grant = self.inner.api.verify_otp(verification).await?;
        self.install_grant(grant).await
    }

    /// Reload the persisted session, if any.
    ///
    /// The restored session may be stale; the next [`ensure_valid`](Self::ensure_valid)
    /// refreshes it. Incomplete or unreadable entries are cleared and yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the store cannot be read.
    pub async fn restore(&self) -> Result<Option<Session>, SessionError> {
        if let Some(session) = self.current() {
            return Ok(Some(session));
        }

        let store = &self.inner.store;
        let access = store.get(CredentialKey::AccessToken).await?;
        let refresh = store.get(CredentialKey::RefreshToken).await?;
        let cached_user = store.get(CredentialKey::User).await?;
        let anything_stored = access.is_some() || refresh.is_some() || cached_user.is_some();

        let (Some(access), Some(refresh)) = (access, refresh) else {
            if anything_stored {
                tracing::debug!("Clearing incomplete persisted session");
                self.clear_store_logged().await;
            }
            return Ok(None);
        };

        let access_token = AccessToken::new(access);
        let expires_at = match access_token.expires_at() {
            Ok(expires_at) => expires_at,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted access token unreadable, discarding session");
                self.clear_store_logged().await;
                return Ok(None);
            }
        };

        let user = cached_user
            .and_then(|json| match serde_json::from_str::<User>(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "Cached user record unreadable");
                    None
                }
            })
            .or_else(|| {
                access_token
                    .claims()
                    .ok()
                    .and_then(|claims| claims.sub)
                    .map(|sub| User::with_id(UserId::new(sub)))
            });

        let Some(user) = user else {
            tracing::warn!("Persisted session has no user identity, discarding");
            self.clear_store_logged().await;
            return Ok(None);
        };

        let session = Session {
            user,
            access_token,
            refresh_token: RefreshToken::new(refresh),
            expires_at,
        };

        {
            let mut state = lock(&self.inner.state);
            state.session = Some(session.clone());
            state.generation += 1;
            state.stale = false;
            state.pending = None;
        }

        tracing::info!(
            user_id = %session.user_id(),
            fresh = session.is_fresh_at(self.inner.clock.now()),
            "Session restored"
        );
        self.inner.publish(LifecycleEvent::SignedIn(session.user_id().clone()));
        Ok(Some(session))
    }

    /// Replace the cached user record and persist it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotSignedIn`] if there is no session
    /// - [`SessionError::Storage`] if the record could not be persisted
    pub async fn update_user(&self, user: User) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.inner.state);
            let Some(session) = state.session.as_mut() else {
                return Err(SessionError::NotSignedIn);
            };
            session.user = user.clone();
        }

        let json = serde_json::to_string(&user).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.inner.store.set(CredentialKey::User, &json).await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session teardown
    // ═══════════════════════════════════════════════════════════════════════

    /// Clear the session from memory and the credential store.
    ///
    /// Idempotent. With `expired = true` the `on_expired` callbacks fire
    /// (once, and only if a session existed); otherwise the `on_signed_out`
    /// callbacks fire and [`LifecycleEvent::SignedOut`] is published.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the store could not be cleared.
    /// The in-memory session is gone regardless.
    pub async fn sign_out(&self, expired: bool) -> Result<(), SessionError> {
        let had_session = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.stale = false;
            state.pending = None;
            state.session.take().is_some()
        };

        let cleared = clear_store(&self.inner.store).await;
        if let Err(e) = &cleared {
            tracing::error!(error = %e, "Failed to clear credential store");
        }

        if had_session {
            if expired {
                self.inner.announce_expiry();
            } else {
                self.inner.announce_sign_out();
            }
        }

        cleared.map_err(SessionError::from)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observers
    // ═══════════════════════════════════════════════════════════════════════

    /// Call `callback` when the system invalidates the session.
    pub fn on_expired<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        lock(&self.inner.listeners)
            .expired
            .push((id, Arc::new(callback)));
        id
    }

    /// Call `callback` when the session ends by a voluntary sign-out.
    ///
    /// Does not fire for expiry; see [`on_expired`](Self::on_expired).
    pub fn on_signed_out<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        lock(&self.inner.listeners)
            .signed_out
            .push((id, Arc::new(callback)));
        id
    }

    /// Call `callback` with the new access token after every successful refresh.
    pub fn on_refreshed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AccessToken) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        lock(&self.inner.listeners)
            .refreshed
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.expired.retain(|(listener, _)| *listener != id);
        listeners.signed_out.retain(|(listener, _)| *listener != id);
        listeners.refreshed.retain(|(listener, _)| *listener != id);
        before != listeners.len()
    }

    /// Receive every lifecycle event published from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn install_grant(&self, grant: TokenGrant) -> Result<Session, SessionError> {
        let session = Session::from_grant(grant, None)?;

        {
            let mut state = lock(&self.inner.state);
            state.session = Some(session.clone());
            state.generation += 1;
            state.stale = false;
            state.pending = None;
        }

        if let Err(e) = persist(&self.inner.store, &session).await {
            tracing::error!(error = %e, "Failed to persist new session");
            return Err(e.into());
        }

        tracing::info!(user_id = %session.user_id(), "Signed in");
        self.inner.publish(LifecycleEvent::SignedIn(session.user_id().clone()));
        Ok(session)
    }

    fn spawn_refresh(&self, generation: u64, refresh_token: RefreshToken, user: User) -> SharedRefresh {
        let task = tokio::spawn(Inner::run_refresh(
            Arc::clone(&self.inner),
            generation,
            refresh_token,
            user,
        ));

        let inner: Weak<Inner<S, A, C>> = Arc::downgrade(&self.inner);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Refresh task failed");
                    if let Some(inner) = inner.upgrade() {
                        inner.clear_pending(generation);
                    }
                    Err(SessionError::Network(format!("refresh task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn clear_store_logged(&self) {
        if let Err(e) = clear_store(&self.inner.store).await {
            tracing::error!(error = %e, "Failed to clear credential store");
        }
    }
}

impl<S, A, C> Inner<S, A, C>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
{
    async fn run_refresh(
        self: Arc<Self>,
        generation: u64,
        refresh_token: RefreshToken,
        user: User,
    ) -> RefreshOutcome {
        SessionMetrics::record_refresh_started();
        tracing::debug!(generation, "Refreshing access token");

        let grant = match self.api.refresh(&refresh_token).await {
            Ok(grant) => grant,
            Err(AuthApiError::RefreshRejected) => {
                SessionMetrics::record_refresh_failed();
                tracing::warn!(generation, "Refresh token rejected");
                self.expire(generation).await;
                return Err(SessionError::SessionExpired);
            }
            Err(e) => {
                SessionMetrics::record_refresh_failed();
                tracing::warn!(generation, error = %e, "Refresh failed, session kept");
                self.clear_pending(generation);
                return Err(e.into());
            }
        };

        let session = match Session::from_grant(grant, Some(user)) {
            Ok(session) => session,
            Err(e) => {
                SessionMetrics::record_refresh_failed();
                tracing::warn!(generation, error = %e, "Refresh issued an unreadable token");
                self.clear_pending(generation);
                return Err(e);
            }
        };

        let applied = {
            let mut state = lock(&self.state);
            if state.generation == generation && state.session.is_some() {
                state.session = Some(session.clone());
                state.stale = false;
                state.pending = None;
                true
            } else {
                false
            }
        };

        if !applied {
            // Signed out or replaced while the exchange was in flight.
            tracing::debug!(generation, "Discarding refresh for a superseded session");
            return Err(SessionError::NotSignedIn);
        }

        if let Err(e) = persist(&self.store, &session).await {
            // The old refresh token is spent; memory holds the only usable pair.
            tracing::error!(error = %e, "Failed to persist refreshed tokens");
        }

        SessionMetrics::record_refresh_succeeded();
        tracing::info!(
            user_id = %session.user_id(),
            expires_at = %session.expires_at,
            "Access token refreshed"
        );
        self.announce_refresh(&session.access_token);
        Ok(session)
    }

    fn clear_pending(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation)
        {
            state.pending = None;
        }
    }

    /// End the session of `generation` because the system invalidated it.
    async fn expire(&self, generation: u64) {
        let had_session = {
            let mut state = lock(&self.state);
            if state.generation == generation {
                state.generation += 1;
                state.stale = false;
                state.pending = None;
                state.session.take().is_some()
            } else {
                false
            }
        };

        if !had_session {
            return;
        }

        if let Err(e) = clear_store(&self.store).await {
            tracing::error!(error = %e, "Failed to clear credential store on expiry");
        }
        self.announce_expiry();
    }

    fn announce_expiry(&self) {
        SessionMetrics::record_expired();
        tracing::info!("Session expired");

        let callbacks: Vec<SessionEndedCallback> = lock(&self.listeners)
            .expired
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
        self.publish(LifecycleEvent::Expired);
    }

    fn announce_sign_out(&self) {
        tracing::info!("Signed out");

        let callbacks: Vec<SessionEndedCallback> = lock(&self.listeners)
            .signed_out
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
        self.publish(LifecycleEvent::SignedOut);
    }

    fn announce_refresh(&self, token: &AccessToken) {
        let callbacks: Vec<RefreshedCallback> = lock(&self.listeners)
            .refreshed
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(token);
        }
        self.publish(LifecycleEvent::Refreshed(token.clone()));
    }

    fn publish(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl<S, A, C> TokenSource for TokenLifecycleManager<S, A, C>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
{
    fn has_session(&self) -> bool {
        Self::has_session(self)
    }

    fn ensure_valid(&self) -> impl Future<Output = Result<Session, SessionError>> + Send {
        Self::ensure_valid(self)
    }
}

async fn persist<S: CredentialStore>(store: &S, session: &Session) -> Result<(), StoreError> {
    let user = serde_json::to_string(&session.user)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    store
        .set(CredentialKey::AccessToken, session.access_token.as_str())
        .await?;
    store
        .set(CredentialKey::RefreshToken, session.refresh_token.as_str())
        .await?;
    store.set(CredentialKey::User, &user).await
}

/// Delete every credential key, attempting all of them even if one fails.
async fn clear_store<S: CredentialStore>(store: &S) -> Result<(), StoreError> {
    let mut first_error = None;
    for key in CredentialKey::ALL {
        if let Err(e) = store.delete(key).await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_session_testing::{
        InMemoryCredentialStore, ManualClock, MockAuthApi, RefreshOutcome, issue_access_token,
    };
    use std::sync::atomic::AtomicUsize;

    type Manager = TokenLifecycleManager<InMemoryCredentialStore, MockAuthApi<ManualClock>, ManualClock>;

    fn setup() -> (Manager, MockAuthApi<ManualClock>, InMemoryCredentialStore, ManualClock) {
        let clock = ManualClock::default();
        let api = MockAuthApi::new(clock.clone()).with_user("ada", "pw", "user-1");
        let store = InMemoryCredentialStore::new();
        let manager = TokenLifecycleManager::new(
            store.clone(),
            api.clone(),
            clock.clone(),
            TokenConfig::default(),
        );
        (manager, api, store, clock)
    }

    #[tokio::test]
    async fn test_sign_in_persists_before_returning() {
        let (manager, _api, store, _clock) = setup();
        let session = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();

        assert!(manager.is_valid());
        assert_eq!(
            store.value(CredentialKey::AccessToken).as_deref(),
            Some(session.access_token.as_str())
        );
        assert!(store.value(CredentialKey::User).unwrap().contains("user-1"));
    }

    #[tokio::test]
    async fn test_fresh_token_is_returned_without_refresh() {
        let (manager, api, _store, _clock) = setup();
        let session = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        let again = manager.ensure_valid().await.unwrap();
        assert_eq!(again.access_token, session.access_token);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_is_valid_is_strict_at_expiry() {
        let (manager, _api, _store, clock) = setup();
        let session = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        clock.set(session.expires_at);
        assert!(!manager.is_valid());
        assert!(manager.has_session());
    }

    #[tokio::test]
    async fn test_leeway_refreshes_early() {
        let clock = ManualClock::default();
        let api = MockAuthApi::new(clock.clone()).with_user("ada", "pw", "user-1");
        let config = TokenConfig {
            refresh_leeway: std::time::Duration::from_secs(120),
            ..TokenConfig::default()
        };
        let manager =
            TokenLifecycleManager::new(InMemoryCredentialStore::new(), api.clone(), clock.clone(), config);
        manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();

        clock.advance(chrono::Duration::minutes(14));
        assert!(manager.is_valid());
        manager.ensure_valid().await.unwrap();
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_refresh_keeps_session() {
        let (manager, api, _store, clock) = setup();
        let original = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        clock.advance(chrono::Duration::hours(1));
        api.script_refresh(RefreshOutcome::Malformed);

        let err = manager.ensure_valid().await.unwrap_err();
        assert!(matches!(err, SessionError::MalformedToken(_)));
        assert_eq!(manager.current().unwrap().access_token, original.access_token);
    }

    #[tokio::test]
    async fn test_invalidate_only_matches_current_token() {
        let (manager, api, _store, _clock) = setup();
        let session = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();

        let other = issue_access_token("user-1", session.expires_at);
        assert!(!manager.invalidate(&other));
        assert!(manager.is_valid());

        assert!(manager.invalidate(&session.access_token));
        assert!(!manager.is_valid());

        let refreshed = manager.ensure_valid().await.unwrap();
        assert_ne!(refreshed.access_token, session.access_token);
        assert_eq!(api.refresh_calls(), 1);
        assert!(manager.is_valid());
    }

    #[tokio::test]
    async fn test_listeners_can_be_removed() {
        let (manager, _api, _store, _clock) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = manager.on_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.remove_listener(id));
        assert!(!manager.remove_listener(id));

        manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        manager.sign_out(true).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_voluntary_sign_out_notifies_signed_out_listeners() {
        let (manager, _api, _store, _clock) = setup();
        let signed_out = Arc::new(AtomicUsize::new(0));
        let expired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signed_out);
        manager.on_signed_out(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&expired);
        manager.on_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        manager.sign_out(false).await.unwrap();
        manager.sign_out(false).await.unwrap();
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);
        assert_eq!(expired.load(Ordering::SeqCst), 0);

        manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        manager.sign_out(true).await.unwrap();
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_user_persists() {
        let (manager, _api, store, _clock) = setup();
        assert_eq!(
            manager.update_user(User::with_id(UserId::new("x"))).await,
            Err(SessionError::NotSignedIn)
        );

        manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap();
        let mut user = manager.current().unwrap().user;
        user.name = Some("Ada".into());
        manager.update_user(user).await.unwrap();

        assert_eq!(manager.current().unwrap().user.name.as_deref(), Some("Ada"));
        assert!(store.value(CredentialKey::User).unwrap().contains("Ada"));
    }

    #[tokio::test]
    async fn test_sign_in_reports_storage_failure() {
        let (manager, _api, store, _clock) = setup();
        store.fail_writes(true);
        let err = manager.sign_in(&Credentials::new("ada", "pw")).await.unwrap_err();
        assert!(matches!(err, SessionError::Storage(_)));
    }

    #[tokio::test]
    async fn test_ensure_valid_without_session() {
        let (manager, _api, _store, _clock) = setup();
        assert_eq!(manager.ensure_valid().await, Err(SessionError::NotSignedIn));
    }
}
