//! Scripted auth endpoints.

use chrono::Duration;
use courier_session_core::environment::Clock;
use courier_session_core::error::AuthApiError;
use courier_session_core::providers::AuthApi;
use courier_session_core::session::{Credentials, OtpVerification, TokenGrant, User, UserId};
use courier_session_core::token::{AccessToken, RefreshToken};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::token::issue_access_token;

/// What the next `refresh` call does, overriding the default behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Issue a new pair (the default for a known refresh token).
    Issue,
    /// Reject the refresh token.
    Reject,
    /// Fail as if the network dropped.
    Transport(String),
    /// Issue an access token without a readable expiry.
    Malformed,
}

#[derive(Debug, Default)]
struct ApiState {
    passwords: HashMap<String, (String, User)>,
    otp_codes: HashMap<String, (String, User)>,
    /// Outstanding refresh tokens and their owners. Rotated on use.
    refresh_tokens: HashMap<String, UserId>,
    refresh_script: VecDeque<RefreshOutcome>,
    sign_in_calls: usize,
    refresh_calls: usize,
    refresh_gate: Option<Arc<Semaphore>>,
    next_refresh_token: u64,
}

/// In-memory auth endpoints.
///
/// Issues unsigned JWT access tokens whose `exp` is `clock.now() + token_ttl`
/// and rotates refresh tokens on every exchange: a refresh token is accepted
/// exactly once.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Clone)]
pub struct MockAuthApi<C: Clock + Clone> {
    state: Arc<Mutex<ApiState>>,
    clock: C,
    token_ttl: Duration,
}

impl<C: Clock + Clone> MockAuthApi<C> {
    /// Create endpoints with no accounts and a 15 minute token lifetime.
    #[must_use]
    pub fn new(clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(ApiState::default())),
            clock,
            token_ttl: Duration::minutes(15),
        }
    }

    /// Set the lifetime of issued access tokens.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Register a password account.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn with_user(self, identifier: &str, password: &str, user_id: &str) -> Self {
        self.state.lock().unwrap().passwords.insert(
            identifier.to_string(),
            (password.to_string(), User::with_id(UserId::new(user_id))),
        );
        self
    }

    /// Register an OTP code for an identifier.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn with_otp(self, identifier: &str, code: &str, user_id: &str) -> Self {
        self.state.lock().unwrap().otp_codes.insert(
            identifier.to_string(),
            (code.to_string(), User::with_id(UserId::new(user_id))),
        );
        self
    }

    /// Queue an outcome for a future `refresh` call. Outcomes are consumed in order.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn script_refresh(&self, outcome: RefreshOutcome) {
        self.state.lock().unwrap().refresh_script.push_back(outcome);
    }

    /// Revoke every outstanding refresh token.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn revoke_all(&self) {
        self.state.lock().unwrap().refresh_tokens.clear();
    }

    /// Mint a refresh token the endpoint will accept, for seeding a store.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    #[must_use]
    pub fn mint_refresh_token(&self, user_id: &str) -> RefreshToken {
        let mut state = self.state.lock().unwrap();
        Self::next_refresh_token(&mut state, UserId::new(user_id))
    }

    /// Make `refresh` calls block until [`release_refreshes`](Self::release_refreshes).
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn hold_refreshes(&self) {
        self.state.lock().unwrap().refresh_gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held `refresh` calls proceed.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn release_refreshes(&self) {
        if let Some(gate) = self.state.lock().unwrap().refresh_gate.take() {
            gate.close();
        }
    }

    /// Number of `refresh` calls received so far.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    /// Number of `sign_in` and `verify_otp` calls received so far.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn sign_in_calls(&self) -> usize {
        self.state.lock().unwrap().sign_in_calls
    }

    /// Wait until at least `n` refresh calls have arrived.
    pub async fn wait_for_refresh_calls(&self, n: usize) {
        while self.refresh_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    fn next_refresh_token(state: &mut ApiState, owner: UserId) -> RefreshToken {
        state.next_refresh_token += 1;
        let token = format!("refresh-{}-{}", owner, state.next_refresh_token);
        state.refresh_tokens.insert(token.clone(), owner);
        RefreshToken::new(token)
    }

    fn grant_for(&self, state: &mut ApiState, user: User, include_user: bool) -> TokenGrant {
        let access_token = issue_access_token(user.id.as_str(), self.clock.now() + self.token_ttl);
        let refresh_token = Self::next_refresh_token(state, user.id.clone());
        TokenGrant {
            access_token,
            refresh_token,
            user: include_user.then_some(user),
        }
    }
}

impl<C: Clock + Clone> AuthApi for MockAuthApi<C> {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn sign_in(&self, credentials: &Credentials) -> Result<TokenGrant, AuthApiError> {
        let mut state = self.state.lock().unwrap();
        state.sign_in_calls += 1;
        let user = state
            .passwords
            .get(&credentials.identifier)
            .filter(|(password, _)| *password == credentials.secret)
            .map(|(_, user)| user.clone())
            .ok_or(AuthApiError::InvalidCredentials)?;
        Ok(self.grant_for(&mut state, user, true))
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn verify_otp(&self, verification: &OtpVerification) -> Result<TokenGrant, AuthApiError> {
        let mut state = self.state.lock().unwrap();
        state.sign_in_calls += 1;
        let user = state
            .otp_codes
            .get(&verification.identifier)
            .filter(|(code, _)| *code == verification.code)
            .map(|(_, user)| user.clone())
            .ok_or(AuthApiError::InvalidCredentials)?;
        Ok(self.grant_for(&mut state, user, true))
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, AuthApiError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.refresh_calls += 1;
            state.refresh_gate.clone()
        };
        if let Some(gate) = gate {
            // Closed on release; the error is the wake-up.
            let _ = gate.acquire().await;
        }

        let mut state = self.state.lock().unwrap();
        let scripted = state.refresh_script.pop_front();
        match scripted {
            Some(RefreshOutcome::Reject) => return Err(AuthApiError::RefreshRejected),
            Some(RefreshOutcome::Transport(reason)) => return Err(AuthApiError::Transport(reason)),
            Some(RefreshOutcome::Malformed) => {
                let owner = state.refresh_tokens.get(refresh_token.as_str()).cloned();
                return match owner {
                    Some(owner) => Ok(TokenGrant {
                        access_token: AccessToken::new("not-a-jwt"),
                        refresh_token: Self::next_refresh_token(&mut state, owner),
                        user: None,
                    }),
                    None => Err(AuthApiError::RefreshRejected),
                };
            }
            Some(RefreshOutcome::Issue) | None => {}
        }

        match state.refresh_tokens.remove(refresh_token.as_str()) {
            Some(owner) => Ok(self.grant_for(&mut state, User::with_id(owner), false)),
            None => Err(AuthApiError::RefreshRejected),
        }
    }
}
