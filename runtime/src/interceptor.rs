//! Authorized requests with one retry on rejection.
//!
//! A resource may reject an access token the local clock still considers
//! valid (clock skew, server-side revocation). [`with_fresh_token`] marks
//! that token stale, refreshes through the single-flight path and retries
//! the operation once.

use courier_session_core::environment::Clock;
use courier_session_core::error::SessionError;
use courier_session_core::providers::{AuthApi, CredentialStore};
use courier_session_core::token::AccessToken;
use std::future::Future;

use crate::tokens::TokenLifecycleManager;

/// Outcome of one authorized attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The resource accepted the token.
    Done(T),
    /// The resource rejected the token (HTTP 401).
    Unauthorized,
}

/// Run `op` with a valid access token, retrying once after a refresh if the
/// token is rejected.
///
/// # Errors
///
/// - Any error from [`TokenLifecycleManager::ensure_valid`]; an expired
///   refresh token cascades into sign-out as usual
/// - [`SessionError::Unauthorized`] if the refreshed token is rejected too.
///   The session is left in place
pub async fn with_fresh_token<S, A, C, T, F, Fut>(
    tokens: &TokenLifecycleManager<S, A, C>,
    mut op: F,
) -> Result<T, SessionError>
where
    S: CredentialStore,
    A: AuthApi,
    C: Clock,
    F: FnMut(AccessToken) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let session = tokens.ensure_valid().await?;
    let rejected = session.access_token;
    if let Attempt::Done(value) = op(rejected.clone()).await {
        return Ok(value);
    }

    tracing::debug!(user_id = %session.user.id, "Access token rejected, refreshing and retrying");
    tokens.invalidate(&rejected);
    let session = tokens.ensure_valid().await?;

    match op(session.access_token).await {
        Attempt::Done(value) => Ok(value),
        Attempt::Unauthorized => {
            tracing::warn!(user_id = %session.user.id, "Refreshed access token rejected");
            Err(SessionError::Unauthorized)
        }
    }
}
