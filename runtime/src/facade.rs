//! Session facade.
//!
//! The one object an application holds. It drives [`AuthReducer`] and wires
//! the token lifecycle manager to the realtime supervisor:
//!
//! - signing in (or restoring) starts realtime and the validity poll
//! - signing out or expiry stops both and clears every channel, including a
//!   sign-out made directly on the token manager
//! - signing in over a live session keeps it running until the new one is
//!   installed; a failed switch leaves the old session untouched
//! - a refresh re-arms realtime if it had gone idle
//!
//! Expiry reaches the facade through the token manager's `on_expired`
//! callback, so the cascade completes before the failing `ensure_valid`
//! call returns, whoever made it.

use courier_session_core::auth_state::{AuthAction, AuthEffect, AuthPhase, AuthReducer, AuthState};
use courier_session_core::config::SessionConfig;
use courier_session_core::environment::Clock;
use courier_session_core::error::SessionError;
use courier_session_core::events::{Advisory, LifecycleEvent};
use courier_session_core::message::ChannelMessage;
use courier_session_core::providers::{AuthApi, CredentialStore, RealtimeConnector};
use courier_session_core::reducer::Reducer;
use courier_session_core::session::{Credentials, OtpVerification, Session, User};
use courier_session_core::token::AccessToken;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::channels::{ChannelBus, Unsubscribe};
use crate::interceptor::{Attempt, with_fresh_token};
use crate::supervisor::RealtimeSupervisor;
use crate::tasks::ScopedTask;
use crate::tokens::{ListenerId, TokenLifecycleManager};

type Tokens<S, A, C> = TokenLifecycleManager<S, A, C>;

#[derive(Default)]
struct FacadeSlot {
    state: AuthState,
    poller: Option<ScopedTask>,
}

struct FacadeInner<S, A, C, K> {
    tokens: Tokens<S, A, C>,
    supervisor: RealtimeSupervisor<K, Tokens<S, A, C>>,
    poll_interval: Duration,
    slot: Mutex<FacadeSlot>,
}

/// Session lifecycle, token freshness and realtime channels behind one handle.
///
/// Cheap to clone; clones share the same session.
///
/// # Type Parameters
///
/// - `S`: Credential store
/// - `A`: Auth endpoints
/// - `C`: Clock
/// - `K`: Realtime connector
///
/// # Example
///
/// ```no_run
/// use courier_session_core::{Credentials, SessionConfig, SystemClock};
/// use courier_session_runtime::{HttpAuthApi, SessionFacade, WebSocketConnector};
/// # use courier_session_testing::InMemoryCredentialStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::from_env()?;
/// let api = HttpAuthApi::new(config.api.clone())?;
/// let facade = SessionFacade::new(
///     InMemoryCredentialStore::new(),
///     api,
///     SystemClock,
///     WebSocketConnector::new(),
///     config,
/// );
///
/// facade.sign_in(&Credentials::new("ada@example.com", "hunter2")).await?;
/// let _subscription = facade.subscribe("notification", |data| {
///     println!("notification: {data}");
/// });
/// # Ok(())
/// # }
/// ```
pub struct SessionFacade<S, A, C, K> {
    inner: Arc<FacadeInner<S, A, C, K>>,
}

impl<S, A, C, K> Clone for SessionFacade<S, A, C, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S, A, C, K> SessionFacade<S, A, C, K>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
    K: RealtimeConnector,
{
    /// Create a signed-out facade.
    ///
    /// `config` is used as given; call [`SessionConfig::validate`] first if
    /// it comes from user input.
    #[must_use]
    pub fn new(store: S, api: A, clock: C, connector: K, config: SessionConfig) -> Self {
        let SessionConfig {
            api: _,
            realtime,
            tokens: token_config,
        } = config;
        let poll_interval = token_config.validity_poll_interval;

        let tokens = TokenLifecycleManager::new(store, api, clock, token_config);
        let supervisor = RealtimeSupervisor::new(connector, tokens.clone(), realtime);

        let inner = Arc::new(FacadeInner {
            tokens,
            supervisor,
            poll_interval,
            slot: Mutex::new(FacadeSlot::default()),
        });

        let this = Arc::downgrade(&inner);
        inner.tokens.on_expired(move || {
            if let Some(this) = this.upgrade() {
                this.apply(AuthAction::Expired);
            }
        });
        // Sign-out through `tokens()` must tear down realtime too.
        let this = Arc::downgrade(&inner);
        inner.tokens.on_signed_out(move || {
            if let Some(this) = this.upgrade() {
                this.apply(AuthAction::SignedOut);
            }
        });
        let this = Arc::downgrade(&inner);
        inner.tokens.on_refreshed(move |_| {
            if let Some(this) = this.upgrade() {
                this.apply(AuthAction::Refreshed);
            }
        });

        Self { inner }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Sign in with identifier and password.
    ///
    /// On success realtime starts in the background; watch
    /// [`watch_connected`](Self::watch_connected) to know when it is open.
    /// When already signed in, the current session keeps running until the
    /// exchange succeeds and is kept if it fails.
    ///
    /// # Errors
    ///
    /// See [`TokenLifecycleManager::sign_in`]. A [`SessionError::Storage`]
    /// error still leaves the facade signed in with an in-memory session.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, SessionError> {
        self.inner.apply(AuthAction::SignInStarted);
        let result = self.inner.tokens.sign_in(credentials).await;
        self.inner.finish_sign_in(&result);
        result
    }

    /// Sign in with a one-time password.
    ///
    /// # Errors
    ///
    /// Same as [`sign_in`](Self::sign_in).
    pub async fn verify_otp(&self, verification: &OtpVerification) -> Result<Session, SessionError> {
        self.inner.apply(AuthAction::SignInStarted);
        let result = self.inner.tokens.verify_otp(verification).await;
        self.inner.finish_sign_in(&result);
        result
    }

    /// Pick up the session persisted by a previous run.
    ///
    /// Returns `None` if nothing usable was stored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the store cannot be read.
    pub async fn restore(&self) -> Result<Option<Session>, SessionError> {
        let restored = self.inner.tokens.restore().await?;
        if restored.is_some() {
            self.inner.apply(AuthAction::Restored);
        }
        Ok(restored)
    }

    /// Sign out voluntarily. Idempotent; never raises the expired advisory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the credential store could not be
    /// cleared. Everything in memory is torn down regardless.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        self.inner.apply(AuthAction::SignedOut);
        self.inner.tokens.sign_out(false).await
    }

    /// Replace the cached user record.
    ///
    /// # Errors
    ///
    /// See [`TokenLifecycleManager::update_user`].
    pub async fn update_user(&self, user: User) -> Result<(), SessionError> {
        self.inner.tokens.update_user(user).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Token access
    // ═══════════════════════════════════════════════════════════════════════

    /// `true` iff signed in with an unexpired access token.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.tokens.is_valid()
    }

    /// A session with a fresh access token, refreshing if needed.
    ///
    /// # Errors
    ///
    /// See [`TokenLifecycleManager::ensure_valid`].
    pub async fn ensure_valid(&self) -> Result<Session, SessionError> {
        self.inner.tokens.ensure_valid().await
    }

    /// Run an authorized request, retrying once with a refreshed token if
    /// it is rejected.
    ///
    /// # Errors
    ///
    /// See [`with_fresh_token`].
    pub async fn authorized<T, F, Fut>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnMut(AccessToken) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        with_fresh_token(&self.inner.tokens, op).await
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.inner.tokens.current()
    }

    /// The token lifecycle manager, for subsystems that only need tokens.
    #[must_use]
    pub fn tokens(&self) -> &TokenLifecycleManager<S, A, C> {
        &self.inner.tokens
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State
    // ═══════════════════════════════════════════════════════════════════════

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        lock(&self.inner.slot).state.phase
    }

    /// Phase and expiry flag.
    #[must_use]
    pub fn state(&self) -> AuthState {
        lock(&self.inner.slot).state
    }

    /// `true` if the last session ended because the system invalidated it.
    ///
    /// Stays set until the next successful sign-in; the application should
    /// show a "please sign in again" prompt while it is.
    #[must_use]
    pub fn session_expired(&self) -> bool {
        lock(&self.inner.slot).state.session_expired
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Realtime
    // ═══════════════════════════════════════════════════════════════════════

    /// The channel bus.
    #[must_use]
    pub fn channels(&self) -> &ChannelBus {
        self.inner.supervisor.bus()
    }

    /// Register `callback` for messages on `channel`.
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> Unsubscribe
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.channels().subscribe(channel, callback)
    }

    /// Remove every callback registered for `channel`.
    pub fn unsubscribe(&self, channel: &str) -> usize {
        self.channels().unsubscribe(channel)
    }

    /// Send a message if the connection is open. Returns `false` if dropped.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        self.inner.supervisor.send(message)
    }

    /// `true` while the realtime connection is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.supervisor.connected()
    }

    /// Observe the `connected` signal.
    #[must_use]
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.supervisor.watch_connected()
    }

    /// The realtime supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &RealtimeSupervisor<K, TokenLifecycleManager<S, A, C>> {
        &self.inner.supervisor
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observers
    // ═══════════════════════════════════════════════════════════════════════

    /// Observe user-facing advisories (connection interrupted, session expired).
    #[must_use]
    pub fn advisories(&self) -> broadcast::Receiver<Advisory> {
        self.inner.supervisor.advisories()
    }

    /// Observe token lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.tokens.subscribe_events()
    }

    /// Call `callback` when the system invalidates the session.
    pub fn on_expired<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.tokens.on_expired(callback)
    }

    /// Call `callback` when the user signs out.
    pub fn on_signed_out<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.tokens.on_signed_out(callback)
    }

    /// Call `callback` with the new access token after every refresh.
    pub fn on_refreshed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AccessToken) + Send + Sync + 'static,
    {
        self.inner.tokens.on_refreshed(callback)
    }

    /// Remove a lifecycle callback.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.tokens.remove_listener(id)
    }
}

impl<S, A, C, K> FacadeInner<S, A, C, K>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
    K: RealtimeConnector,
{
    fn apply(self: &Arc<Self>, action: AuthAction) {
        let mut slot = lock(&self.slot);
        let from = slot.state.phase;
        let effects = AuthReducer.reduce(&mut slot.state, action, &());
        if from != slot.state.phase {
            tracing::debug!(
                from = ?from,
                to = ?slot.state.phase,
                action = ?action,
                session_expired = slot.state.session_expired,
                "Session transition"
            );
        }
        for effect in effects {
            self.execute(&mut slot, effect);
        }
    }

    fn execute(self: &Arc<Self>, slot: &mut FacadeSlot, effect: AuthEffect) {
        match effect {
            AuthEffect::StartRealtime => self.supervisor.start(),
            AuthEffect::StopRealtime => self.supervisor.stop(),
            AuthEffect::StartValidityPoll => {
                slot.poller = Some(ScopedTask::spawn(Self::poll_validity(
                    Arc::downgrade(self),
                    self.poll_interval,
                )));
            }
            AuthEffect::StopValidityPoll => {
                if let Some(poller) = slot.poller.take() {
                    poller.cancel();
                }
            }
            AuthEffect::Advise(advisory) => {
                tracing::info!(advisory = %advisory, "Session advisory");
                self.supervisor.advise(advisory);
            }
        }
    }

    fn finish_sign_in(self: &Arc<Self>, result: &Result<Session, SessionError>) {
        match result {
            Ok(_) => self.apply(AuthAction::SignInSucceeded),
            // Persisting failed but the session is live in memory.
            Err(SessionError::Storage(_)) if self.tokens.has_session() => {
                self.apply(AuthAction::SignInSucceeded);
            }
            Err(e) => {
                tracing::info!(error = %e, "Sign-in failed");
                self.apply(AuthAction::SignInFailed);
            }
        }
    }

    /// Periodic `ensure_valid` while signed in. The first check runs one
    /// full interval after sign-in.
    async fn poll_validity(this: Weak<Self>, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(this) = this.upgrade() else {
                return;
            };

            match this.tokens.ensure_valid().await {
                // Re-arm realtime if a previous attempt gave up.
                Ok(_) => this.supervisor.start(),
                // The expiry callback has already torn everything down.
                Err(SessionError::SessionExpired | SessionError::NotSignedIn) => return,
                Err(e) => tracing::warn!(error = %e, "Validity check failed, retrying next interval"),
            }
        }
    }
}
